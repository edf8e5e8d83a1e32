//! Gateway error taxonomy and the JSON error envelope returned to callers

use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderValue};
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Client-visible failure of the gateway layer
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Service temporarily unavailable: circuit breaker {name} is open")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("Operation timed out after {0:?}")]
    OperationTimeout(Duration),

    #[error("Service Unavailable: no healthy instance of {0}")]
    ServiceUnavailable(String),

    #[error("Too Many Requests: rate limit exceeded and queue is full")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Request Timeout: queued request was not admitted within {0:?}")]
    RateLimitTimeout(Duration),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Render into a response carrying the given request id
    pub fn to_response(&self, request_id: &str) -> HttpResponse {
        let status = self.status_code();
        let mut response = HttpResponse::build(status);

        if let Some(retry_after) = self.retry_after() {
            // Whole seconds, rounded up so clients never retry early.
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            response.insert_header((header::RETRY_AFTER, secs.to_string()));
        }
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.insert_header(("x-request-id", value));
        }

        response.json(ErrorEnvelope::new(status, self.to_string(), request_id))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::CircuitOpen { retry_after, .. }
            | GatewayError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<crate::rate_limit::RateLimitError> for GatewayError {
    fn from(error: crate::rate_limit::RateLimitError) -> Self {
        use crate::rate_limit::RateLimitError;

        match error {
            RateLimitError::QueueFull { retry_after, .. } => GatewayError::RateLimitExceeded { retry_after },
            RateLimitError::Timeout { waited, .. } => GatewayError::RateLimitTimeout(waited),
        }
    }
}

impl From<crate::discovery::RegistryError> for GatewayError {
    fn from(error: crate::discovery::RegistryError) -> Self {
        use crate::discovery::RegistryError;

        match error {
            RegistryError::NotFound(_) => GatewayError::NotFound(error.to_string()),
            RegistryError::DependencyUnavailable { .. } => {
                GatewayError::DependencyUnavailable(error.to_string())
            }
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RateLimitTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::OperationTimeout(_) | GatewayError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response(&uuid::Uuid::new_v4().to_string())
    }
}

/// `{ "error": { code, message, timestamp, requestId } }`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// HTTP status code
    pub code: u16,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: status.as_u16(),
                message: message.into(),
                timestamp: Utc::now(),
                request_id: request_id.into(),
            },
        }
    }
}
