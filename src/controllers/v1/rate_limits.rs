use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;
use crate::rate_limit::{KeyStats, RateLimiter, RateLimiterStats};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOverview {
    pub stats: RateLimiterStats,
    /// Per-key windows, keyed `METHOD:path:client_ip`
    pub keys: Vec<KeyStats>,
}

/// Limiter totals and the live per-key windows
#[utoipa::path(
    tag = "Rate Limits",
    responses(
        (status = 200, description = "Limiter state", body = RateLimitOverview),
    )
)]
#[get("/api/v1/rate-limits")]
pub async fn index(limiter: Data<RateLimiter>) -> impl Responder {
    Json(RateLimitOverview {
        stats: limiter.stats(),
        keys: limiter.all_key_stats(),
    })
}

/// Start a fresh window for one key
///
/// Keys contain slashes, so everything between the prefix and `/reset` is the key.
#[utoipa::path(
    post,
    path = "/api/v1/rate-limits/{key}/reset",
    tag = "Rate Limits",
    params(("key" = String, Path, description = "Limiter key")),
    responses(
        (status = 200, description = "Window reset", body = KeyStats),
        (status = 404, description = "Unknown key", body = crate::error::ErrorEnvelope),
    )
)]
#[post("/api/v1/rate-limits/{key:.+}/reset")]
pub async fn reset(limiter: Data<RateLimiter>, key: Path<String>) -> Result<impl Responder, GatewayError> {
    let key = key.into_inner();
    if !limiter.reset(&key) {
        return Err(GatewayError::NotFound(format!("rate limit key {}", key)));
    }

    limiter
        .key_stats(&key)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("rate limit key {}", key)))
}
