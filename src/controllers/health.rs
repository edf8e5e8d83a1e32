//! Health check endpoints
//!
//! Liveness for process supervisors and a readiness view built from the
//! circuit breakers and the registry.

use actix_web::web::{Data, Json};
use actix_web::{get, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::discovery::{HealthProber, ProberStats, RegistryStats, ServiceRegistry};
use crate::resilience::{BreakerHealth, CircuitBreakerManager, HealthSummary};

/// Liveness health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    /// Service status
    pub status: String,
    /// Application version
    pub version: String,
    /// Timestamp of the check
    pub timestamp: DateTime<Utc>,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    /// `healthy`, `degraded` or `unhealthy`
    pub status: BreakerHealth,
    pub timestamp: DateTime<Utc>,
    pub circuit_breakers: HealthSummary,
    pub services: RegistryStats,
    pub prober: ProberStats,
}

/// Liveness check endpoint
///
/// Returns 200 OK whenever the process is serving requests.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = LivenessResponse),
    )
)]
#[get("/health")]
pub async fn health() -> impl Responder {
    ::tracing::debug!("Liveness check: healthy");
    Json(LivenessResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness probe
///
/// 503 while every circuit breaker is open.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Gateway can route traffic", body = ReadinessResponse),
        (status = 503, description = "All circuits are open", body = ReadinessResponse),
    )
)]
#[get("/ready")]
pub async fn ready(
    breakers: Data<CircuitBreakerManager>,
    registry: Data<ServiceRegistry>,
    prober: Data<HealthProber>,
) -> impl Responder {
    let summary = breakers.health_summary();
    let response = ReadinessResponse {
        status: summary.health_status,
        timestamp: Utc::now(),
        circuit_breakers: summary,
        services: registry.stats(),
        prober: prober.stats(),
    };

    ::tracing::debug!(status = ?response.status, "Readiness check performed");

    if response.status == BreakerHealth::Unhealthy {
        HttpResponse::ServiceUnavailable().json(response)
    } else {
        HttpResponse::Ok().json(response)
    }
}
