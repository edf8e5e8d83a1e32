use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;
use crate::resilience::{CircuitBreakerManager, CircuitBreakerStats, CircuitState, HealthSummary};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub key: String,
    pub state: CircuitState,
}

/// Stats of every circuit breaker
#[utoipa::path(
    tag = "Circuit Breakers",
    responses(
        (status = 200, description = "All breakers sorted by name", body = [CircuitBreakerStats]),
    )
)]
#[get("/api/v1/circuit-breakers")]
pub async fn index(breakers: Data<CircuitBreakerManager>) -> impl Responder {
    Json(breakers.all_stats())
}

/// Aggregate breaker health
#[utoipa::path(
    tag = "Circuit Breakers",
    responses(
        (status = 200, description = "Counts by state", body = HealthSummary),
    )
)]
#[get("/api/v1/circuit-breakers/health")]
pub async fn health(breakers: Data<CircuitBreakerManager>) -> impl Responder {
    Json(breakers.health_summary())
}

/// Force a breaker back to closed
#[utoipa::path(
    tag = "Circuit Breakers",
    params(("key" = String, Path, description = "Breaker key, e.g. proxy-users")),
    responses(
        (status = 200, description = "Breaker reset", body = ResetResponse),
        (status = 404, description = "Unknown breaker", body = crate::error::ErrorEnvelope),
    )
)]
#[post("/api/v1/circuit-breakers/{key}/reset")]
pub async fn reset(
    breakers: Data<CircuitBreakerManager>,
    key: Path<String>,
) -> Result<impl Responder, GatewayError> {
    let key = key.into_inner();
    if !breakers.reset(&key) {
        return Err(GatewayError::NotFound(format!("circuit breaker {}", key)));
    }

    ::tracing::info!(circuit_breaker = %key, "Circuit breaker reset via admin API");
    Ok(Json(ResetResponse {
        key,
        state: CircuitState::Closed,
    }))
}

/// Force every breaker back to closed
#[utoipa::path(
    tag = "Circuit Breakers",
    responses(
        (status = 200, description = "All breakers reset", body = HealthSummary),
    )
)]
#[post("/api/v1/circuit-breakers/reset")]
pub async fn reset_all(breakers: Data<CircuitBreakerManager>) -> impl Responder {
    breakers.reset_all();
    ::tracing::info!(count = breakers.len(), "All circuit breakers reset via admin API");
    Json(breakers.health_summary())
}
