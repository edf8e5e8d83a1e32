use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate};
use crate::rate_limit::{RateLimit, RateLimiterConfig, MAX_LIMIT_DURATION_MS};

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Length of one counting window
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Waiters held once the window is full
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// How long a waiter may sit in the queue
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Interval between sweeps of dormant entries
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Do not count requests that end successfully
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Do not count requests that fail
    #[serde(default)]
    pub skip_failed_requests: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    100
}

fn default_queue_size() -> usize {
    10
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            queue_size: default_queue_size(),
            queue_timeout_ms: default_queue_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

impl From<&RateLimitConfig> for RateLimiterConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            default_limit: RateLimit {
                window: Duration::from_millis(config.window_ms),
                max_requests: config.max_requests,
                queue_size: config.queue_size,
                queue_timeout: Duration::from_millis(config.queue_timeout_ms),
            },
            skip_successful_requests: config.skip_successful_requests,
            skip_failed_requests: config.skip_failed_requests,
            cleanup_interval: Duration::from_millis(config.cleanup_interval_ms),
        }
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.window_ms must be > 0".to_string(),
            ));
        }
        if self.window_ms > MAX_LIMIT_DURATION_MS || self.queue_timeout_ms > MAX_LIMIT_DURATION_MS {
            return Err(ConfigError::ValidationError(format!(
                "rate_limit.window_ms and rate_limit.queue_timeout_ms must be <= {}",
                MAX_LIMIT_DURATION_MS
            )));
        }
        if self.enabled && self.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_requests must be > 0 when rate limiting is enabled".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.cleanup_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
