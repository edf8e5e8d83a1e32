//! Bridges component notifications into logs and Prometheus series.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::discovery::{HealthStatus, RegistryEvent, ServiceRegistry};
use crate::resilience::{CircuitBreakerEvent, CircuitBreakerManager, FailureKind};

pub struct EventLogger {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventLogger {
    /// Subscribe to breaker and registry notifications. Must be called
    /// inside a Tokio runtime.
    pub fn start(breakers: &CircuitBreakerManager, registry: &Arc<ServiceRegistry>) -> Self {
        let breaker_events = breakers.subscribe();
        let registry_events = registry.subscribe();
        let registry = registry.clone();

        publish_instance_gauges(&registry);

        let tasks = vec![
            tokio::spawn(listen(breaker_events, |event| on_breaker_event(&event))),
            tokio::spawn(listen(registry_events, move |event| {
                on_registry_event(&event);
                publish_instance_gauges(&registry);
            })),
        ];

        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn listen<T, F>(mut events: broadcast::Receiver<T>, mut handle: F)
where
    T: Clone,
    F: FnMut(T),
{
    loop {
        match events.recv().await {
            Ok(event) => handle(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged, notifications dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

pub fn on_breaker_event(event: &CircuitBreakerEvent) {
    match event {
        CircuitBreakerEvent::StateChanged { name, from, to } => {
            crate::metrics::record_breaker_transition(name, *from, *to);
        }
        CircuitBreakerEvent::Success { name, elapsed } => {
            tracing::trace!(circuit_breaker = %name, elapsed_ms = elapsed.as_millis() as u64, "Call succeeded");
            crate::metrics::record_breaker_call(name, "success");
        }
        CircuitBreakerEvent::Failure { name, kind } => {
            let outcome = match kind {
                FailureKind::Error => "failure",
                FailureKind::Timeout => "timeout",
            };
            tracing::debug!(circuit_breaker = %name, outcome, "Call failed");
            crate::metrics::record_breaker_call(name, outcome);
        }
        CircuitBreakerEvent::Rejected { name } => {
            tracing::debug!(circuit_breaker = %name, "Call rejected by open circuit");
            crate::metrics::record_breaker_call(name, "rejected");
        }
    }
}

pub fn on_registry_event(event: &RegistryEvent) {
    if let RegistryEvent::StatusChanged { name, id, from, to } = event {
        if event.is_recovery() {
            tracing::info!(service = %name, instance_id = %id, from = %from, "Service instance recovered");
        } else if event.is_failure() {
            tracing::warn!(service = %name, instance_id = %id, from = %from, "Service instance became unhealthy");
        } else {
            tracing::info!(service = %name, instance_id = %id, from = %from, to = %to, "Service instance status changed");
        }
    }
}

fn publish_instance_gauges(registry: &ServiceRegistry) {
    let stats = registry.stats();
    for status in [
        HealthStatus::Unknown,
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
    ] {
        let count = stats.by_status.get(&status.to_string()).copied().unwrap_or(0);
        crate::metrics::set_service_instances(status, count);
    }
}
