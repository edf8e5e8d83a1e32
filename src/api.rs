use utoipa::OpenApi;

use crate::{controllers, discovery, error, gateway, rate_limit, resilience};

#[derive(OpenApi)]
#[openapi(
    info(title = "lighter-gateway", description = "Resilience and traffic layer admin API"),
    tags(
        (name = "Services"),
        (name = "Circuit Breakers"),
        (name = "Rate Limits"),
        (name = "Health"),
    ),
    paths(
        controllers::v1::services::index,
        controllers::v1::services::register,
        controllers::v1::services::stats,
        controllers::v1::services::discover,
        controllers::v1::services::dependencies,
        controllers::v1::services::show,
        controllers::v1::services::deregister,

        controllers::v1::circuit_breakers::index,
        controllers::v1::circuit_breakers::health,
        controllers::v1::circuit_breakers::reset,
        controllers::v1::circuit_breakers::reset_all,

        controllers::v1::rate_limits::index,
        controllers::v1::rate_limits::reset,

        controllers::health::health,
        controllers::health::ready,
    ),
    components(schemas(
        discovery::ServiceRegistration,
        discovery::ServiceInstance,
        discovery::HealthStatus,
        discovery::Scheme,
        discovery::RegistryStats,
        discovery::ProberStats,

        resilience::CircuitState,
        resilience::CircuitBreakerStats,
        resilience::BreakerHealth,
        resilience::HealthSummary,

        rate_limit::RateLimiterStats,
        rate_limit::KeyStats,

        gateway::RouteConfig,
        gateway::RouteRateLimit,

        error::ErrorEnvelope,
        error::ErrorBody,

        controllers::v1::services::DependencyReport,
        controllers::v1::circuit_breakers::ResetResponse,
        controllers::v1::rate_limits::RateLimitOverview,
        controllers::health::LivenessResponse,
        controllers::health::ReadinessResponse,
    )),
)]
pub struct Definition;
