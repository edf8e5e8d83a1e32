use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::proxy::{ProxyRequest, ProxyResponse};
use crate::rate_limit::{RateLimit, LATENCY_SENSITIVE_QUEUE_TIMEOUT, MAX_LIMIT_DURATION_MS};

/// Default deadline for a proxied call
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

pub type RequestTransform = Arc<dyn Fn(&mut ProxyRequest) + Send + Sync>;
pub type ResponseTransform = Arc<dyn Fn(&mut ProxyResponse) + Send + Sync>;

/// Optional hooks applied to the outbound request and the relayed response
#[derive(Clone, Default)]
pub struct Transforms {
    pub request: Option<RequestTransform>,
    pub response: Option<ResponseTransform>,
}

impl fmt::Debug for Transforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transforms")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

/// Per-route admission limits; unset fields use the limiter defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteRateLimit {
    #[serde(alias = "window_ms")]
    pub window_ms: u64,
    pub max: u32,
    #[serde(default, alias = "queue_size")]
    pub queue_size: Option<usize>,
    #[serde(default, alias = "queue_timeout_ms")]
    pub queue_timeout_ms: Option<u64>,
}

/// One gateway route, looked up by `METHOD:path`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub method: String,
    pub path: String,
    #[serde(alias = "service_name")]
    pub service_name: String,
    /// Path sent upstream instead of `path`
    #[serde(default, alias = "target_path")]
    pub target_path: Option<String>,
    /// Instance selection filter
    #[serde(default)]
    pub tags: Vec<String>,
    /// Deadline in milliseconds, 30s when unset
    #[serde(default, alias = "timeout_ms", rename = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default, alias = "rate_limit")]
    pub rate_limit: Option<RouteRateLimit>,
    /// Shortens the default queue timeout to 10s
    #[serde(default, alias = "latency_sensitive")]
    pub latency_sensitive: bool,
    #[serde(skip)]
    pub transform: Transforms,
}

impl RouteConfig {
    pub fn new(method: &str, path: &str, service_name: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            service_name: service_name.to_string(),
            target_path: None,
            tags: Vec::new(),
            timeout_ms: None,
            rate_limit: None,
            latency_sensitive: false,
            transform: Transforms::default(),
        }
    }

    pub fn with_target_path(mut self, target_path: &str) -> Self {
        self.target_path = Some(target_path.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RouteRateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_request_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&mut ProxyRequest) + Send + Sync + 'static,
    {
        self.transform.request = Some(Arc::new(transform));
        self
    }

    pub fn with_response_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&mut ProxyResponse) + Send + Sync + 'static,
    {
        self.transform.response = Some(Arc::new(transform));
        self
    }

    /// Lookup key, `GET:/api/users`
    pub fn key(&self) -> String {
        route_key(&self.method, &self.path)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ROUTE_TIMEOUT)
    }

    /// Effective limits for this route on top of `defaults`
    pub fn effective_rate_limit(&self, defaults: &RateLimit) -> RateLimit {
        let mut limit = defaults.clone();
        if self.latency_sensitive {
            limit.queue_timeout = LATENCY_SENSITIVE_QUEUE_TIMEOUT;
        }
        if let Some(route) = &self.rate_limit {
            limit.window = Duration::from_millis(route.window_ms);
            limit.max_requests = route.max;
            if let Some(queue_size) = route.queue_size {
                limit.queue_size = queue_size;
            }
            if let Some(queue_timeout_ms) = route.queue_timeout_ms {
                limit.queue_timeout = Duration::from_millis(queue_timeout_ms);
            }
        }
        limit
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.method.parse::<actix_web::http::Method>().is_err() || self.method.is_empty() {
            return Err(format!("invalid method {:?}", self.method));
        }
        if !self.path.starts_with('/') {
            return Err(format!("path {:?} must start with '/'", self.path));
        }
        if self.service_name.is_empty() {
            return Err(format!("route {} has no serviceName", self.key()));
        }
        if let Some(target) = &self.target_path {
            if !target.starts_with('/') {
                return Err(format!("targetPath {:?} must start with '/'", target));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(format!("route {} timeout must be > 0", self.key()));
        }
        if self.timeout_ms.is_some_and(|ms| ms > MAX_LIMIT_DURATION_MS) {
            return Err(format!("route {} timeout exceeds {}ms", self.key(), MAX_LIMIT_DURATION_MS));
        }
        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.window_ms == 0 || rate_limit.max == 0 {
                return Err(format!("route {} rateLimit needs windowMs and max > 0", self.key()));
            }
            if rate_limit.window_ms > MAX_LIMIT_DURATION_MS
                || rate_limit.queue_timeout_ms.is_some_and(|ms| ms > MAX_LIMIT_DURATION_MS)
            {
                return Err(format!(
                    "route {} rateLimit windowMs and queueTimeoutMs must not exceed {}ms",
                    self.key(),
                    MAX_LIMIT_DURATION_MS
                ));
            }
        }
        Ok(())
    }
}

pub fn route_key(method: &str, path: &str) -> String {
    format!("{}:{}", method.to_ascii_uppercase(), path)
}
