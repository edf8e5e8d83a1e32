use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Smoothing factor for the moving averages
pub const EMA_ALPHA: f64 = 0.1;

const LATENCY_CEILING_MS: f64 = 5000.0;
const CONNECTION_CEILING: f64 = 100.0;

/// Per-instance load and quality figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetrics {
    pub active_connections: u64,
    pub total_requests: u64,
    /// Exponential moving average, milliseconds
    pub average_response_time_ms: f64,
    /// Exponential moving average of the failure indicator
    pub error_rate: f64,
    pub weight: u32,
}

impl InstanceMetrics {
    /// Score of an instance that has not served a request yet
    pub const UNMEASURED_SCORE: f64 = 0.5;

    pub fn new(weight: u32) -> Self {
        Self {
            active_connections: 0,
            total_requests: 0,
            average_response_time_ms: 0.0,
            error_rate: 0.0,
            weight,
        }
    }

    pub fn record(&mut self, response_time: Duration, success: bool) {
        let sample = response_time.as_secs_f64() * 1000.0;
        self.total_requests += 1;
        self.average_response_time_ms = EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * self.average_response_time_ms;
        self.error_rate = if success {
            (1.0 - EMA_ALPHA) * self.error_rate
        } else {
            EMA_ALPHA + (1.0 - EMA_ALPHA) * self.error_rate
        };
    }

    pub fn connection_started(&mut self) {
        self.active_connections += 1;
    }

    pub fn connection_ended(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    /// 0.4 latency + 0.4 reliability + 0.2 spare capacity, each in [0, 1]
    pub fn score(&self) -> f64 {
        if self.total_requests == 0 {
            return Self::UNMEASURED_SCORE;
        }

        let latency = 1.0 - (self.average_response_time_ms / LATENCY_CEILING_MS).min(1.0);
        let reliability = 1.0 - self.error_rate;
        let capacity = 1.0 - (self.active_connections as f64 / CONNECTION_CEILING).min(1.0);

        0.4 * latency + 0.4 * reliability + 0.2 * capacity
    }
}
