//! Resilience patterns for fault-tolerant service calls
//!
//! # Available Patterns
//!
//! - **Circuit Breaker**: Prevents cascading failures by temporarily blocking
//!   requests to failing dependencies, giving them time to recover.
//! - **Circuit Breaker Manager**: One lazily created breaker per dependency
//!   key, with a shared notification channel.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use lighter_gateway::resilience::{CircuitBreakerConfig, CircuitBreakerManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CircuitBreakerManager::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     success_threshold: 3,
//!     recovery_timeout: Duration::from_secs(60),
//!     call_timeout: Duration::from_secs(30),
//! });
//!
//! let result = manager.execute("inventory", async {
//!     Ok::<_, std::io::Error>(())
//! }).await;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod manager;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerEvent,
    CircuitBreakerStats, CircuitState, FailureKind,
};
pub use manager::{BreakerHealth, CircuitBreakerManager, HealthSummary};
