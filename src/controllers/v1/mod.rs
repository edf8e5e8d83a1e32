pub mod circuit_breakers;
pub mod rate_limits;
pub mod services;
