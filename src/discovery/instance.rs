use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health of one registered instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Registered but not probed yet
    #[default]
    Unknown,
    Healthy,
    /// Reachable but reporting pressure or partial dependency loss
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Parse a `status` value reported by a health endpoint
    pub fn from_reported(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "healthy" => Some(HealthStatus::Healthy),
            "degraded" => Some(HealthStatus::Degraded),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            "unknown" => Some(HealthStatus::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    /// Scheme used for plain HTTP calls to the same endpoint
    pub fn http_equivalent(&self) -> &'static str {
        match self {
            Scheme::Http | Scheme::Ws => "http",
            Scheme::Https | Scheme::Wss => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
            Scheme::Ws => write!(f, "ws"),
            Scheme::Wss => write!(f, "wss"),
        }
    }
}

/// Instance metadata: a recognised `weight` plus any other keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    /// Weighted round robin share, 1 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Registration request for one instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    /// Generated when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default = "default_health_path", alias = "health_path")]
    pub health_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: InstanceMetadata,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// One running backend endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub health_path: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    #[schema(value_type = Object)]
    pub metadata: InstanceMetadata,
    pub registered_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    /// Failed probes since the last successful one
    pub consecutive_failures: u32,
    /// Latency of the last successful probe
    pub response_time_ms: Option<f64>,
}

impl From<ServiceRegistration> for ServiceInstance {
    fn from(registration: ServiceRegistration) -> Self {
        let health_path = if registration.health_path.starts_with('/') {
            registration.health_path
        } else {
            format!("/{}", registration.health_path)
        };

        Self {
            id: registration
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: registration.name,
            version: registration.version,
            host: registration.host,
            port: registration.port,
            scheme: registration.scheme,
            health_path,
            tags: registration.tags,
            dependencies: registration.dependencies,
            metadata: registration.metadata,
            registered_at: Utc::now(),
            last_health_check_at: None,
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            response_time_ms: None,
        }
    }
}

impl ServiceInstance {
    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// URL probed by the health prober, always over HTTP(S)
    pub fn health_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.http_equivalent(),
            self.host,
            self.port,
            self.health_path
        )
    }

    /// Base URL for proxied HTTP calls
    pub fn http_base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.http_equivalent(), self.host, self.port)
    }

    pub fn weight(&self) -> u32 {
        self.metadata.weight.unwrap_or(1)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// True when every requested tag is present on this instance
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }
}
