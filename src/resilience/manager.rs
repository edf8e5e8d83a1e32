//! Keyed registry of circuit breakers
//!
//! Breakers are created lazily on first use and live until removed. All of
//! them publish into one shared event channel, so a single subscriber sees
//! every transition in the process.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerEvent,
    CircuitBreakerStats, CircuitState,
};

const EVENT_CAPACITY: usize = 1024;

/// Aggregate health across all breakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BreakerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub health_status: BreakerHealth,
    pub open_breakers: Vec<String>,
}

pub struct CircuitBreakerManager {
    breakers: DashMap<String, CircuitBreaker>,
    default_config: CircuitBreakerConfig,
    events: broadcast::Sender<CircuitBreakerEvent>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            breakers: DashMap::with_shard_amount((num_cpus::get() * 4).next_power_of_two()),
            default_config,
            events,
        }
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Breaker for `key`, created with the default configuration if missing
    pub fn get_or_create(&self, key: &str) -> CircuitBreaker {
        self.get_or_create_with(key, || self.default_config.clone())
    }

    /// Breaker for `key`, created with the supplied configuration if missing.
    ///
    /// An existing breaker keeps its configuration.
    pub fn get_or_create_with<F>(&self, key: &str, config: F) -> CircuitBreaker
    where
        F: FnOnce() -> CircuitBreakerConfig,
    {
        if let Some(existing) = self.breakers.get(key) {
            return existing.clone();
        }

        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(circuit_breaker = %key, "Creating circuit breaker");
                CircuitBreaker::with_events(key.to_string(), config(), self.events.clone())
            })
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<CircuitBreaker> {
        self.breakers.get(key).map(|breaker| breaker.clone())
    }

    /// Run `operation` through the breaker for `key` under its call timeout
    pub async fn execute<F, T, E>(&self, key: &str, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(key);
        breaker.call(operation).await
    }

    /// Run `operation` through the breaker for `key` under an explicit deadline
    pub async fn execute_with_timeout<F, T, E>(
        &self,
        key: &str,
        deadline: Duration,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(key);
        breaker.call_with_timeout(deadline, operation).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitBreakerEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(key).map(|breaker| breaker.stats())
    }

    /// Stats of every breaker, sorted by name
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|entry| entry.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Returns false when no breaker exists for `key`
    pub fn reset(&self, key: &str) -> bool {
        match self.breakers.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.breakers.remove(key).is_some();
        if removed {
            tracing::info!(circuit_breaker = %key, "Circuit breaker removed");
        }
        removed
    }

    /// Replace a breaker's configuration in place. Returns false when absent.
    pub fn update_config(&self, key: &str, config: CircuitBreakerConfig) -> bool {
        match self.breakers.get(key) {
            Some(breaker) => {
                breaker.update_config(config);
                tracing::info!(circuit_breaker = %key, "Circuit breaker configuration updated");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn health_summary(&self) -> HealthSummary {
        let mut summary = HealthSummary {
            total: 0,
            closed: 0,
            open: 0,
            half_open: 0,
            health_status: BreakerHealth::Healthy,
            open_breakers: Vec::new(),
        };

        for entry in self.breakers.iter() {
            summary.total += 1;
            match entry.value().state() {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
                CircuitState::Open => {
                    summary.open += 1;
                    summary.open_breakers.push(entry.key().clone());
                }
            }
        }
        summary.open_breakers.sort();

        summary.health_status = if summary.open == 0 {
            BreakerHealth::Healthy
        } else if summary.open < summary.total {
            BreakerHealth::Degraded
        } else {
            BreakerHealth::Unhealthy
        };

        summary
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
