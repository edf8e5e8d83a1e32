use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate};
use crate::balancer::Strategy;

/// Registry probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interval between probe rounds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Deadline for one health probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Breaker guarding each service's health endpoint
    #[serde(default)]
    pub probe_breaker: ProbeBreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeBreakerConfig {
    #[serde(default = "default_probe_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_probe_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

/// Instance selection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub strategy: Strategy,
}

fn default_probe_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_probe_failure_threshold() -> u32 {
    3
}

fn default_probe_success_threshold() -> u32 {
    1
}

fn default_probe_recovery_timeout_ms() -> u64 {
    30_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_breaker: ProbeBreakerConfig::default(),
        }
    }
}

impl Default for ProbeBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_probe_failure_threshold(),
            success_threshold: default_probe_success_threshold(),
            recovery_timeout_ms: default_probe_recovery_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Breaker settings for `health-check-{name}` keys
    pub fn probe_breaker_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.probe_breaker.failure_threshold,
            success_threshold: self.probe_breaker.success_threshold,
            recovery_timeout: Duration::from_millis(self.probe_breaker.recovery_timeout_ms),
            call_timeout: self.probe_timeout(),
        }
    }
}

impl Validate for DiscoveryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.probe_interval_ms must be > 0".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.probe_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.probe_timeout_ms > self.probe_interval_ms {
            return Err(ConfigError::ValidationError(
                "discovery.probe_timeout_ms cannot exceed probe_interval_ms".to_string(),
            ));
        }
        if self.probe_breaker.failure_threshold == 0 || self.probe_breaker.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.probe_breaker thresholds must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
