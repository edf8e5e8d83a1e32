//! API gateway
//!
//! Each inbound request matching a registered route goes through the same
//! pipeline: rate limiting keyed by route and client IP, instance selection,
//! then the forwarded call under the service's `proxy-{service}` circuit
//! breaker. Failures at any stage become the JSON error envelope.

mod proxy;
mod route;

pub use proxy::{
    forward, forwardable_headers, ProxyError, ProxyRequest, ProxyResponse, FORWARDED_HEADERS,
    HOP_BY_HOP_HEADERS, MAX_RESPONSE_BODY,
};
pub use route::{
    route_key, RequestTransform, ResponseTransform, RouteConfig, RouteRateLimit, Transforms,
    DEFAULT_ROUTE_TIMEOUT,
};

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::HeaderMap;
use actix_web::http::Method;
use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse};
use dashmap::DashMap;

use crate::balancer::LoadBalancer;
use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager};

/// Inbound request as seen by the pipeline
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
    pub request_id: String,
}

impl GatewayRequest {
    pub fn from_http(req: &HttpRequest, body: Bytes) -> Self {
        let query = req.query_string();
        Self {
            method: req.method().clone(),
            path: req.path().to_string(),
            query: (!query.is_empty()).then(|| query.to_string()),
            headers: req.headers().clone(),
            body,
            client_ip: client_ip(req),
            request_id: request_id(req.headers()),
        }
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address
pub fn client_ip(req: &HttpRequest) -> String {
    let headers = req.headers();
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Inbound `X-Request-ID` when present, otherwise a fresh UUID
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub struct Gateway {
    routes: DashMap<String, Arc<RouteConfig>>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakerManager>,
    limiter: Arc<RateLimiter>,
}

impl Gateway {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakerManager>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            routes: DashMap::new(),
            balancer,
            breakers,
            limiter,
        }
    }

    pub fn breaker_key(service_name: &str) -> String {
        format!("proxy-{}", service_name)
    }

    /// Add a route. Routes are immutable once registered, so a second
    /// registration of the same `METHOD:path` is rejected.
    pub fn register_route(&self, route: RouteConfig) -> Result<(), GatewayError> {
        route.validate().map_err(GatewayError::BadRequest)?;

        let key = route.key();
        match self.routes.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GatewayError::BadRequest(format!("route {} is already registered", key)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    route = %key,
                    service = %route.service_name,
                    timeout_ms = route.timeout().as_millis() as u64,
                    "Route registered"
                );
                slot.insert(Arc::new(route));
                Ok(())
            }
        }
    }

    pub fn route(&self, method: &str, path: &str) -> Option<Arc<RouteConfig>> {
        self.routes
            .get(&route_key(method, path))
            .map(|route| route.value().clone())
    }

    /// Registered routes sorted by key
    pub fn routes(&self) -> Vec<Arc<RouteConfig>> {
        let mut routes: Vec<_> = self.routes.iter().map(|entry| entry.value().clone()).collect();
        routes.sort_by_key(|route| route.key());
        routes
    }

    /// Run the pipeline for a request. `None` when no route matches.
    pub async fn handle(&self, request: GatewayRequest) -> Option<HttpResponse> {
        let route = self.route(request.method.as_str(), &request.path)?;
        let started = Instant::now();
        let request_id = request.request_id.clone();

        let response = match self.dispatch(&route, request).await {
            Ok(proxied) => relay(proxied, &request_id),
            Err(error) => {
                tracing::warn!(
                    route = %route.key(),
                    request_id = %request_id,
                    error = %error,
                    "Gateway request failed"
                );
                error.to_response(&request_id)
            }
        };

        crate::metrics::record_gateway_request(
            &route.key(),
            response.status().as_u16(),
            started.elapsed(),
        );
        Some(response)
    }

    /// Admit, forward and report the outcome to the limiter
    #[tracing::instrument(skip(self, route, request), fields(route = %route.key(), client_ip = %request.client_ip))]
    pub async fn dispatch(
        &self,
        route: &RouteConfig,
        request: GatewayRequest,
    ) -> Result<ProxyResponse, GatewayError> {
        let limit = route.effective_rate_limit(self.limiter.default_limit());
        let limiter_key = format!("{}:{}", route.key(), request.client_ip);
        let permit = self.limiter.acquire(&limiter_key, &limit).await?;

        let result = self.proxy(route, request).await;
        permit.complete(result.is_ok());
        result
    }

    async fn proxy(
        &self,
        route: &RouteConfig,
        request: GatewayRequest,
    ) -> Result<ProxyResponse, GatewayError> {
        let instance = self
            .balancer
            .pick(&route.service_name, &route.tags)
            .ok_or_else(|| GatewayError::ServiceUnavailable(route.service_name.clone()))?;

        let mut outbound = ProxyRequest {
            method: request.method,
            path: route.target_path.clone().unwrap_or(request.path),
            query: request.query,
            headers: forwardable_headers(&request.headers),
            body: request.body,
        };
        outbound.set_header("x-request-id", &request.request_id);
        outbound.set_header("x-forwarded-for", &request.client_ip);
        if let Some(transform) = &route.transform.request {
            transform(&mut outbound);
        }

        let timeout = route.timeout();
        let started = Instant::now();
        let connection = self.balancer.track_connection(&instance.id);
        let result = self
            .breakers
            .execute_with_timeout(
                &Self::breaker_key(&route.service_name),
                timeout,
                forward(&instance, outbound, timeout),
            )
            .await;
        drop(connection);
        let elapsed = started.elapsed();

        match result {
            Ok(mut response) => {
                self.balancer.record_request(&instance.id, elapsed, true);
                if let Some(transform) = &route.transform.response {
                    transform(&mut response);
                }
                response.strip_hop_by_hop();
                Ok(response)
            }
            Err(CircuitBreakerError::Open { name, retry_after }) => {
                Err(GatewayError::CircuitOpen { name, retry_after })
            }
            Err(CircuitBreakerError::Timeout { after, .. }) => {
                self.balancer.record_request(&instance.id, elapsed, false);
                Err(GatewayError::OperationTimeout(after))
            }
            Err(CircuitBreakerError::Inner(error)) => {
                self.balancer.record_request(&instance.id, elapsed, false);
                tracing::debug!(instance_id = %instance.id, error = %error, "Upstream call failed");
                Err(GatewayError::Upstream(route.service_name.clone()))
            }
        }
    }
}

fn relay(proxied: ProxyResponse, request_id: &str) -> HttpResponse {
    let mut builder = HttpResponse::build(proxied.status);
    for (name, value) in proxied.headers.iter() {
        builder.append_header((name.clone(), value.clone()));
    }
    builder.insert_header(("x-request-id", request_id));
    builder.body(proxied.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::Strategy;
    use crate::discovery::{HealthStatus, ServiceRegistry};
    use crate::rate_limit::RateLimiterConfig;
    use crate::resilience::CircuitBreakerConfig;
    use crate::testing::setup;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;
    use actix_web::web;
    use std::time::Duration;

    fn gateway(registry: Arc<ServiceRegistry>, breaker: CircuitBreakerConfig) -> Gateway {
        Gateway::new(
            Arc::new(LoadBalancer::new(registry, Strategy::RoundRobin)),
            Arc::new(CircuitBreakerManager::new(breaker)),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        )
    }

    fn request(method: Method, path: &str) -> GatewayRequest {
        let http = TestRequest::default()
            .method(method)
            .uri(path)
            .insert_header(("x-forwarded-for", "10.0.0.1, 10.0.0.2"))
            .insert_header(("cookie", "session=secret"))
            .to_http_request();
        GatewayRequest::from_http(&http, Bytes::new())
    }

    async fn json(response: HttpResponse) -> serde_json::Value {
        let body = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_request_identity() {
        let http = TestRequest::default()
            .insert_header(("x-real-ip", "192.168.1.9"))
            .insert_header(("x-request-id", "abc"))
            .to_http_request();
        assert_eq!(client_ip(&http), "192.168.1.9");
        assert_eq!(request_id(http.headers()), "abc");

        let http = TestRequest::default().to_http_request();
        assert!(uuid::Uuid::parse_str(&request_id(http.headers())).is_ok());
    }

    #[test]
    fn test_duplicate_and_invalid_routes_rejected() {
        let gateway = gateway(Arc::new(ServiceRegistry::new()), CircuitBreakerConfig::default());

        assert!(gateway.register_route(RouteConfig::new("get", "/users", "users")).is_ok());
        assert!(gateway.register_route(RouteConfig::new("GET", "/users", "other")).is_err());
        assert!(gateway.register_route(RouteConfig::new("GET", "users", "users")).is_err());

        assert_eq!(gateway.routes().len(), 1);
        assert!(gateway.route("GET", "/users").is_some());
        assert!(gateway.route("POST", "/users").is_none());
    }

    #[actix_web::test]
    async fn test_unmatched_route_returns_none() {
        let gateway = gateway(Arc::new(ServiceRegistry::new()), CircuitBreakerConfig::default());
        assert!(gateway.handle(request(Method::GET, "/nothing")).await.is_none());
    }

    #[actix_web::test]
    async fn test_no_healthy_instance_is_503() {
        let registry = Arc::new(ServiceRegistry::new());
        let gateway = gateway(registry.clone(), CircuitBreakerConfig::default());
        gateway
            .register_route(RouteConfig::new("GET", "/users", "users"))
            .unwrap();

        let response = gateway.handle(request(Method::GET, "/users")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(response).await["error"]["code"], 503);
    }

    #[actix_web::test]
    async fn test_proxies_with_headers_and_transforms() {
        let (addr, server) = setup::spawn_backend(|cfg: &mut web::ServiceConfig| {
            cfg.route(
                "/v2/users",
                web::get().to(|req: HttpRequest| async move {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string()
                    };
                    HttpResponse::Ok()
                        .insert_header(("x-backend", "yes"))
                        .json(serde_json::json!({
                            "forwardedFor": header("x-forwarded-for"),
                            "cookie": header("cookie"),
                            "tenant": header("x-tenant"),
                            "query": req.query_string(),
                        }))
                }),
            );
        })
        .await;

        let registry = Arc::new(ServiceRegistry::new());
        setup::healthy_instance(&registry, "users", addr.port());
        let gateway = gateway(registry, CircuitBreakerConfig::default());
        gateway
            .register_route(
                RouteConfig::new("GET", "/users", "users")
                    .with_target_path("/v2/users")
                    .with_request_transform(|req| req.set_header("x-tenant", "acme"))
                    .with_response_transform(|res| res.set_header("x-transformed", "1")),
            )
            .unwrap();

        let mut inbound = request(Method::GET, "/users");
        inbound.query = Some("page=2".to_string());
        let response = gateway.handle(inbound).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-backend").unwrap(), "yes");
        assert_eq!(response.headers().get("x-transformed").unwrap(), "1");
        assert!(response.headers().get("x-request-id").is_some());

        let body = json(response).await;
        assert_eq!(body["forwardedFor"], "10.0.0.1");
        assert_eq!(body["cookie"], "");
        assert_eq!(body["tenant"], "acme");
        assert_eq!(body["query"], "page=2");

        server.stop(true).await;
    }

    #[actix_web::test]
    async fn test_backend_failures_open_the_breaker() {
        let (addr, server) = setup::spawn_backend(|cfg: &mut web::ServiceConfig| {
            cfg.route("/flaky", web::get().to(|| async { HttpResponse::InternalServerError().finish() }));
        })
        .await;

        let registry = Arc::new(ServiceRegistry::new());
        setup::healthy_instance(&registry, "flaky", addr.port());
        let gateway = gateway(
            registry,
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
        );
        gateway
            .register_route(RouteConfig::new("GET", "/flaky", "flaky"))
            .unwrap();

        for _ in 0..2 {
            let response = gateway.handle(request(Method::GET, "/flaky")).await.unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        let response = gateway.handle(request(Method::GET, "/flaky")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("retry-after").is_some());
        let body = json(response).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("proxy-flaky"));

        server.stop(true).await;
    }

    #[actix_web::test]
    async fn test_slow_backend_times_out() {
        let (addr, server) = setup::spawn_backend(|cfg: &mut web::ServiceConfig| {
            cfg.route(
                "/slow",
                web::get().to(|| async {
                    actix_web::rt::time::sleep(Duration::from_millis(500)).await;
                    HttpResponse::Ok().finish()
                }),
            );
        })
        .await;

        let registry = Arc::new(ServiceRegistry::new());
        let instance = setup::healthy_instance(&registry, "slow", addr.port());
        let gateway = gateway(registry, CircuitBreakerConfig::default());
        gateway
            .register_route(RouteConfig::new("GET", "/slow", "slow").with_timeout(Duration::from_millis(50)))
            .unwrap();

        let response = gateway.handle(request(Method::GET, "/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let metrics = gateway.balancer.metrics(&instance.id).unwrap();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.active_connections, 0);
        assert!(metrics.error_rate > 0.0);

        server.stop(true).await;
    }

    #[actix_web::test]
    async fn test_cancelled_call_releases_connection() {
        let (addr, server) = setup::spawn_backend(|cfg: &mut web::ServiceConfig| {
            cfg.route(
                "/slow",
                web::get().to(|| async {
                    actix_web::rt::time::sleep(Duration::from_millis(500)).await;
                    HttpResponse::Ok().finish()
                }),
            );
        })
        .await;

        let registry = Arc::new(ServiceRegistry::new());
        let instance = setup::healthy_instance(&registry, "slow", addr.port());
        let gateway = gateway(registry, CircuitBreakerConfig::default());
        gateway.register_route(RouteConfig::new("GET", "/slow", "slow")).unwrap();

        // Caller gives up first, as when a client disconnects.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), gateway.handle(request(Method::GET, "/slow"))).await;
        assert!(abandoned.is_err());

        let metrics = gateway.balancer.metrics(&instance.id).unwrap();
        assert_eq!(metrics.active_connections, 0);

        server.stop(true).await;
    }

    #[actix_web::test]
    async fn test_rate_limit_with_full_queue_is_429() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(setup::registration("limited", setup::closed_port()));
        let gateway = gateway(registry, CircuitBreakerConfig::default());
        gateway
            .register_route(RouteConfig::new("GET", "/limited", "limited").with_rate_limit(RouteRateLimit {
                window_ms: 60_000,
                max: 1,
                queue_size: Some(0),
                queue_timeout_ms: None,
            }))
            .unwrap();

        // No healthy instance: the first call is admitted and fails with 503.
        let first = gateway.handle(request(Method::GET, "/limited")).await.unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let second = gateway.handle(request(Method::GET, "/limited")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get("retry-after").is_some());
    }

    #[actix_web::test]
    async fn test_unreachable_instance_is_500() {
        let registry = Arc::new(ServiceRegistry::new());
        let instance = setup::healthy_instance(&registry, "gone", setup::closed_port());
        let gateway = gateway(registry.clone(), CircuitBreakerConfig::default());
        gateway.register_route(RouteConfig::new("GET", "/gone", "gone")).unwrap();

        let response = gateway.handle(request(Method::GET, "/gone")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(registry.get(&instance.id).unwrap().status, HealthStatus::Healthy);
    }
}
