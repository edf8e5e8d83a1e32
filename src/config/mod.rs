pub mod app;
pub mod discovery;
pub mod gateway;
pub mod rate_limit;
pub mod resilience;

pub use app::{AppConfig, AppMetadata, ObservabilityConfig, ServerConfig};
pub use discovery::{DiscoveryConfig, LoadBalancerConfig, ProbeBreakerConfig};
pub use gateway::GatewayConfig;
pub use rate_limit::RateLimitConfig;
pub use resilience::{CircuitBreakerConfig, ResilienceConfig};

/// Configuration loading or validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Sanity checks run after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Fully populated configuration without reading any source
pub trait WithDefaults {
    fn with_defaults() -> Self;
}

/// Load the application configuration from files and environment variables
pub fn load() -> Result<AppConfig, ConfigError> {
    app::load_config()
}
