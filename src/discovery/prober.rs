//! Active health probing
//!
//! Every instance is probed when the prober starts, on a fixed interval
//! after that, and once right after it registers. Each probe is an HTTP GET against the instance health endpoint,
//! run through the `health-check-{name}` circuit breaker with its own short
//! deadline. Probes of different instances run concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use actix_web::rt;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use super::instance::{HealthStatus, ServiceInstance};
use super::registry::{RegistryEvent, ServiceRegistry};
use crate::config::DiscoveryConfig;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager};

const MAX_HEALTH_BODY: usize = 64 * 1024;
const PRESSURE_THRESHOLD: f64 = 90.0;

/// Why a probe did not produce a health body
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("health request failed: {0}")]
    Request(String),

    #[error("health endpoint returned {0}")]
    Status(u16),

    #[error("failed to read health body: {0}")]
    Body(String),
}

#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ProberConfig {
    fn default() -> Self {
        (&DiscoveryConfig::default()).into()
    }
}

impl From<&DiscoveryConfig> for ProberConfig {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            interval: config.probe_interval(),
            timeout: config.probe_timeout(),
            breaker: config.probe_breaker_config(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProberStats {
    pub running: bool,
    pub total_probes: u64,
    pub failed_probes: u64,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

/// Decide an instance's status from a 2xx health body
///
/// A recognised `status` field wins. Otherwise memory or CPU pressure above
/// 90% means degraded, then the `dependencies` map is checked: all down is
/// unhealthy, some down is degraded.
pub fn evaluate(body: &Value) -> HealthStatus {
    if let Some(status) = body
        .get("status")
        .and_then(Value::as_str)
        .and_then(HealthStatus::from_reported)
    {
        return status;
    }

    let memory = body.pointer("/memory/percentage").and_then(Value::as_f64);
    let cpu = body.pointer("/cpu/usage").and_then(Value::as_f64);
    if memory.is_some_and(|m| m > PRESSURE_THRESHOLD) || cpu.is_some_and(|c| c > PRESSURE_THRESHOLD) {
        return HealthStatus::Degraded;
    }

    if let Some(dependencies) = body.get("dependencies").and_then(Value::as_object) {
        let total = dependencies.len();
        let failed = dependencies
            .values()
            .filter(|available| available.as_bool() == Some(false))
            .count();

        if failed > 0 && failed == total {
            return HealthStatus::Unhealthy;
        }
        if failed > 0 {
            return HealthStatus::Degraded;
        }
    }

    HealthStatus::Healthy
}

async fn fetch_health(url: String, timeout: Duration) -> Result<Value, ProbeError> {
    let client = awc::Client::builder().timeout(timeout).finish();

    let mut response = client
        .get(url.as_str())
        .insert_header(("Accept", "application/json"))
        .send()
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ProbeError::Status(response.status().as_u16()));
    }

    let body = response
        .body()
        .limit(MAX_HEALTH_BODY)
        .await
        .map_err(|e| ProbeError::Body(e.to_string()))?;

    // An empty or non-JSON 2xx body still means the instance answered.
    Ok(serde_json::from_slice(&body).unwrap_or(Value::Null))
}

pub struct HealthProber {
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    config: ProberConfig,
    total_probes: AtomicU64,
    failed_probes: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        config: ProberConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            config,
            total_probes: AtomicU64::new(0),
            failed_probes: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn breaker_key(service_name: &str) -> String {
        format!("health-check-{}", service_name)
    }

    /// Probe one instance and write the outcome back to the registry
    #[tracing::instrument(skip(self, instance), fields(service = %instance.name, instance_id = %instance.id))]
    pub async fn probe(&self, instance: &ServiceInstance) -> HealthStatus {
        self.total_probes.fetch_add(1, Ordering::Relaxed);

        let breaker = self
            .breakers
            .get_or_create_with(&Self::breaker_key(&instance.name), || self.config.breaker.clone());

        let started = Instant::now();
        let result = breaker
            .call_with_timeout(
                self.config.timeout,
                fetch_health(instance.health_url(), self.config.timeout),
            )
            .await;

        let (status, elapsed) = match result {
            Ok(body) => (evaluate(&body), Some(started.elapsed())),
            Err(error) => {
                self.failed_probes.fetch_add(1, Ordering::Relaxed);
                match &error {
                    CircuitBreakerError::Open { .. } => {
                        tracing::debug!("Health check skipped, circuit breaker open")
                    }
                    _ => tracing::debug!(error = %error, "Health check failed"),
                }
                (HealthStatus::Unhealthy, None)
            }
        };

        crate::metrics::record_health_probe(status);
        self.registry
            .update_health(&instance.name, &instance.id, status, elapsed);
        status
    }

    /// Probe a registered instance by id
    pub async fn probe_instance(&self, id: &str) -> Option<HealthStatus> {
        let instance = self.registry.get(id)?;
        Some(self.probe(&instance).await)
    }

    /// Probe every registered instance concurrently
    pub async fn probe_all(&self) -> Vec<(String, HealthStatus)> {
        let instances = self.registry.all();
        let statuses = join_all(instances.iter().map(|instance| self.probe(instance))).await;

        instances
            .into_iter()
            .map(|instance| instance.id)
            .zip(statuses)
            .collect()
    }

    /// Start the interval loop and the on-registration listener.
    ///
    /// Must be called from within an actix system. A second call while
    /// running is ignored. The tasks hold the prober, so call [`stop`](Self::stop)
    /// to release it.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        // Subscribe before the first round so no registration falls between the two.
        let mut events = self.registry.subscribe();

        let prober = Arc::clone(self);
        tasks.push(rt::spawn(async move {
            // First tick fires immediately: instances registered before start are probed now.
            let mut interval = tokio::time::interval(prober.config.interval);
            loop {
                interval.tick().await;
                let results = prober.probe_all().await;
                tracing::debug!(probed = results.len(), "Health check round finished");
            }
        }));

        let prober = Arc::clone(self);
        tasks.push(rt::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Registered(instance)) => {
                        let prober = Arc::clone(&prober);
                        rt::spawn(async move {
                            prober.probe(&instance).await;
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Health prober lagged behind registry events, probing all");
                        let prober = Arc::clone(&prober);
                        rt::spawn(async move {
                            prober.probe_all().await;
                        });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Health prober started"
        );
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Health prober stopped");
    }

    pub fn is_running(&self) -> bool {
        !self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn stats(&self) -> ProberStats {
        ProberStats {
            running: self.is_running(),
            total_probes: self.total_probes.load(Ordering::Relaxed),
            failed_probes: self.failed_probes.load(Ordering::Relaxed),
            interval_ms: self.config.interval.as_millis() as u64,
            timeout_ms: self.config.timeout.as_millis() as u64,
        }
    }
}
