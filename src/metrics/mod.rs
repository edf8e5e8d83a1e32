use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::balancer::Strategy;
use crate::discovery::HealthStatus;
use crate::resilience::CircuitState;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Clone)]
pub struct AppMetrics {
    prometheus_handle: Arc<PrometheusHandle>,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::with_config(None)
    }

    pub fn with_config(config: Option<&crate::config::AppConfig>) -> Self {
        let handle = PROMETHEUS_HANDLE.get_or_init(|| {
            let builder = PrometheusBuilder::new();

            let builder = if let Some(cfg) = config {
                builder
                    .add_global_label("service", cfg.app.name.clone())
                    .add_global_label("version", cfg.app.version.clone())
                    .add_global_label("environment", cfg.app.environment.clone())
            } else {
                builder
            };

            let builder = builder
                .set_buckets_for_metric(
                    Matcher::Full("gateway_request_duration_seconds".to_string()),
                    &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0],
                )
                .expect("Failed to set buckets for gateway_request_duration_seconds");

            Self::describe_metrics();

            builder
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        });

        Self {
            prometheus_handle: Arc::new(handle.clone()),
        }
    }

    fn describe_metrics() {
        // Gateway
        describe_counter!("gateway_requests_total", "Total number of proxied requests");
        describe_histogram!(
            "gateway_request_duration_seconds",
            "Proxied request duration in seconds, including queueing"
        );

        // Circuit breakers
        describe_counter!(
            "circuit_breaker_transitions_total",
            "Circuit breaker state transitions"
        );
        describe_counter!(
            "circuit_breaker_calls_total",
            "Calls through circuit breakers by outcome"
        );

        // Discovery
        describe_counter!("health_probes_total", "Health probes by resulting status");
        describe_gauge!("service_instances", "Registered instances by health status");

        // Traffic
        describe_counter!(
            "rate_limit_decisions_total",
            "Rate limiter admission decisions"
        );
        describe_counter!(
            "load_balancer_selections_total",
            "Instance selections by strategy"
        );
    }

    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// The recorders below go through the global `metrics` facade and are no-ops
// until `AppMetrics` installs the exporter.

pub fn record_gateway_request(route: &str, status: u16, duration: Duration) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "breaker" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// `outcome` is one of success, failure, timeout, rejected
pub fn record_breaker_call(name: &str, outcome: &'static str) {
    counter!(
        "circuit_breaker_calls_total",
        "breaker" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_health_probe(status: HealthStatus) {
    counter!("health_probes_total", "status" => status.to_string()).increment(1);
}

pub fn set_service_instances(status: HealthStatus, count: usize) {
    gauge!("service_instances", "status" => status.to_string()).set(count as f64);
}

pub fn record_rate_limit_decision(decision: &'static str) {
    counter!("rate_limit_decisions_total", "decision" => decision).increment(1);
}

pub fn record_selection(strategy: Strategy) {
    counter!("load_balancer_selections_total", "strategy" => strategy.to_string()).increment(1);
}
