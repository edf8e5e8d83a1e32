pub mod api;
pub mod balancer;
pub mod components;
pub mod config;
pub mod controllers;
pub mod discovery;
pub mod error;
pub mod events;
pub mod gateway;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod resilience;
pub mod router;

// Testing utilities (always available for integration tests)
pub mod testing;

// Re-export commonly used types for convenience
pub use balancer::{LoadBalancer, Strategy};
pub use components::Components;
pub use discovery::{HealthProber, ServiceInstance, ServiceRegistration, ServiceRegistry};
pub use error::GatewayError;
pub use gateway::{Gateway, RouteConfig};
pub use metrics::AppMetrics;
pub use rate_limit::RateLimiter;
pub use resilience::{CircuitBreaker, CircuitBreakerManager};
