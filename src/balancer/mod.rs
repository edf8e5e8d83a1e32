//! Load balancer
//!
//! Picks one healthy instance of a logical service. Candidates come from the
//! registry's `discover` and are snapshotted per call, so membership changes
//! between calls never index out of range. Per-instance metrics follow the
//! registry: created on registration, dropped on deregistration.

mod metrics;
mod strategy;

pub use metrics::{InstanceMetrics, EMA_ALPHA};
pub use strategy::Strategy;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::discovery::{RegistryEvent, ServiceInstance, ServiceRegistry};

pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: Strategy,
    counters: DashMap<String, AtomicUsize>,
    metrics: DashMap<String, InstanceMetrics>,
    events: Mutex<broadcast::Receiver<RegistryEvent>>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, strategy: Strategy) -> Self {
        let events = registry.subscribe();
        let balancer = Self {
            registry,
            strategy,
            counters: DashMap::new(),
            metrics: DashMap::new(),
            events: Mutex::new(events),
        };
        balancer.reseed();
        balancer
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select an instance with the configured strategy
    pub fn pick(&self, service_name: &str, tags: &[String]) -> Option<ServiceInstance> {
        self.pick_with(self.strategy, service_name, tags)
    }

    /// Select an instance with an explicit strategy
    pub fn pick_with(
        &self,
        strategy: Strategy,
        service_name: &str,
        tags: &[String],
    ) -> Option<ServiceInstance> {
        self.sync();

        let mut candidates = self.registry.discover(service_name, tags);
        if candidates.len() <= 1 {
            return candidates.pop();
        }

        let lookup = |id: &str| self.metrics.get(id).map(|m| m.clone());
        let index = match strategy {
            Strategy::RoundRobin => {
                let counter = self.counter(service_name);
                strategy::round_robin(&counter, &candidates)
            }
            Strategy::LeastConnections => strategy::least_connections(&candidates, lookup),
            Strategy::WeightedRoundRobin => {
                let counter = self.counter(service_name);
                strategy::weighted_round_robin(&counter, &candidates)
            }
            Strategy::Random => strategy::random(&candidates),
            Strategy::HealthBased => strategy::health_based(&candidates, lookup),
        };

        crate::metrics::record_selection(strategy);
        tracing::trace!(
            service = %service_name,
            strategy = %strategy,
            instance_id = %candidates[index].id,
            "Instance selected"
        );
        Some(candidates.swap_remove(index))
    }

    fn counter(&self, service_name: &str) -> dashmap::mapref::one::Ref<'_, String, AtomicUsize> {
        if let Some(counter) = self.counters.get(service_name) {
            return counter;
        }
        self.counters
            .entry(service_name.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .downgrade()
    }

    /// Fold a finished call into the instance's moving averages.
    ///
    /// No-op for unknown ids, e.g. an instance deregistered mid-call.
    pub fn record_request(&self, instance_id: &str, response_time: Duration, success: bool) {
        self.sync();
        if let Some(mut metrics) = self.metrics.get_mut(instance_id) {
            metrics.record(response_time, success);
        }
    }

    pub fn record_connection_start(&self, instance_id: &str) {
        self.sync();
        if let Some(mut metrics) = self.metrics.get_mut(instance_id) {
            metrics.connection_started();
        }
    }

    pub fn record_connection_end(&self, instance_id: &str) {
        self.sync();
        if let Some(mut metrics) = self.metrics.get_mut(instance_id) {
            metrics.connection_ended();
        }
    }

    /// Count an open connection until the guard is dropped, including when
    /// the owning future is cancelled mid-call.
    pub fn track_connection(&self, instance_id: &str) -> ConnectionGuard<'_> {
        self.record_connection_start(instance_id);
        ConnectionGuard {
            balancer: self,
            instance_id: instance_id.to_string(),
        }
    }

    pub fn metrics(&self, instance_id: &str) -> Option<InstanceMetrics> {
        self.sync();
        self.metrics.get(instance_id).map(|m| m.clone())
    }

    pub fn all_metrics(&self) -> BTreeMap<String, InstanceMetrics> {
        self.sync();
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Apply pending registry notifications to the metrics table.
    ///
    /// Skipped when another caller is already draining the channel.
    fn sync(&self) {
        let mut events = match self.events.try_lock() {
            Ok(events) => events,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        loop {
            match events.try_recv() {
                Ok(RegistryEvent::Registered(instance)) => {
                    self.metrics
                        .insert(instance.id.clone(), InstanceMetrics::new(instance.weight()));
                }
                Ok(RegistryEvent::Deregistered { id, .. }) => {
                    self.metrics.remove(&id);
                }
                Ok(RegistryEvent::StatusChanged { .. }) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Load balancer lagged behind registry, resyncing");
                    self.reseed();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Align the metrics table with the registry's current membership
    fn reseed(&self) {
        let instances = self.registry.all();
        self.metrics
            .retain(|id, _| instances.iter().any(|instance| &instance.id == id));
        for instance in instances {
            self.metrics
                .entry(instance.id.clone())
                .or_insert_with(|| InstanceMetrics::new(instance.weight()));
        }
    }
}

/// Open connection to one instance, released on drop
pub struct ConnectionGuard<'a> {
    balancer: &'a LoadBalancer,
    instance_id: String,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.balancer.record_connection_end(&self.instance_id);
    }
}
