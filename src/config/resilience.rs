use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate};

/// Resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Defaults for lazily created breakers
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Circuit breaker configuration, durations in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Consecutive half-open successes needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Deadline for every protected call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_success_threshold() -> u32 {
    3
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            success_threshold: default_success_threshold(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl From<&CircuitBreakerConfig> for crate::resilience::CircuitBreakerConfig {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }
}

impl From<&crate::resilience::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(config: &crate::resilience::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout_ms: config.recovery_timeout.as_millis() as u64,
            success_threshold: config.success_threshold,
            call_timeout_ms: config.call_timeout.as_millis() as u64,
        }
    }
}

impl Validate for CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.success_threshold must be > 0".to_string(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.call_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()
    }
}
