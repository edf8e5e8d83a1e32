use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App, HttpRequest, HttpResponse};
use lighter_gateway::config::{AppConfig, WithDefaults};
use lighter_gateway::gateway::{RouteConfig, RouteRateLimit};
use lighter_gateway::resilience::CircuitState;
use lighter_gateway::testing::setup;
use lighter_gateway::{router, Strategy};

/// Backend answering every GET on `path` with its own name
async fn named_backend(path: &'static str, name: &'static str) -> (u16, actix_web::dev::ServerHandle) {
    let (addr, server) = setup::spawn_backend(move |cfg: &mut web::ServiceConfig| {
        cfg.route(
            path,
            web::get().to(move |req: HttpRequest| async move {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                HttpResponse::Ok().json(serde_json::json!({ "backend": name, "requestId": request_id }))
            }),
        );
    })
    .await;
    (addr.port(), server)
}

fn limited_route(path: &str, service: &str, max: u32, window_ms: u64, queue_timeout_ms: Option<u64>) -> RouteConfig {
    RouteConfig::new("GET", path, service).with_rate_limit(RouteRateLimit {
        window_ms,
        max,
        queue_size: Some(1),
        queue_timeout_ms,
    })
}

#[actix_web::test]
async fn test_round_robin_across_backends() {
    let (port_a, server_a) = named_backend("/users", "a").await;
    let (port_b, server_b) = named_backend("/users", "b").await;

    let mut config = AppConfig::with_defaults();
    config.load_balancer.strategy = Strategy::RoundRobin;
    config.gateway.routes.push(RouteConfig::new("GET", "/users", "users"));
    let components = setup::components_with(config);
    setup::healthy_instance(&components.registry, "users", port_a);
    setup::healthy_instance(&components.registry, "users", port_b);

    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..4 {
        let req = test::TestRequest::get().uri("/users").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        *counts.entry(body["backend"].as_str().unwrap().to_string()).or_default() += 1;
    }

    assert_eq!(counts.get("a"), Some(&2));
    assert_eq!(counts.get("b"), Some(&2));

    server_a.stop(true).await;
    server_b.stop(true).await;
}

#[actix_web::test]
async fn test_request_id_is_forwarded_and_echoed() {
    let (port, server) = named_backend("/users", "a").await;

    let mut config = AppConfig::with_defaults();
    config.gateway.routes.push(RouteConfig::new("GET", "/users", "users"));
    let components = setup::components_with(config);
    setup::healthy_instance(&components.registry, "users", port);

    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let req = test::TestRequest::get()
        .uri("/users")
        .insert_header(("x-request-id", "trace-42"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "trace-42");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["requestId"], "trace-42");

    server.stop(true).await;
}

#[actix_web::test]
async fn test_unknown_route_is_404_and_admin_routes_are_not_proxied() {
    let components = setup::components();
    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let req = test::TestRequest::get().uri("/api/unknown").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], 404);

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 200);
}

#[actix_web::test]
async fn test_queued_request_is_admitted_in_next_window() {
    let (port, server) = named_backend("/search", "a").await;

    let mut config = AppConfig::with_defaults();
    config.gateway.routes.push(limited_route("/search", "search", 1, 300, None));
    let components = setup::components_with(config);
    setup::healthy_instance(&components.registry, "search", port);

    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let first = test::call_service(&app, test::TestRequest::get().uri("/search").to_request()).await;
    assert_eq!(first.status().as_u16(), 200);

    // Window full: one request waits in the queue, the next finds it full.
    let (queued, rejected) = futures_util::future::join(
        test::call_service(&app, test::TestRequest::get().uri("/search").to_request()),
        test::call_service(&app, test::TestRequest::get().uri("/search").to_request()),
    )
    .await;

    assert_eq!(queued.status().as_u16(), 200);
    assert_eq!(rejected.status().as_u16(), 429);
    assert!(rejected.headers().get("retry-after").is_some());

    server.stop(true).await;
}

#[actix_web::test]
async fn test_queue_timeout_is_408() {
    let (port, server) = named_backend("/reports", "a").await;

    let mut config = AppConfig::with_defaults();
    config.gateway.routes.push(limited_route("/reports", "reports", 1, 10_000, Some(100)));
    let components = setup::components_with(config);
    setup::healthy_instance(&components.registry, "reports", port);

    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let first = test::call_service(&app, test::TestRequest::get().uri("/reports").to_request()).await;
    assert_eq!(first.status().as_u16(), 200);

    let second = test::call_service(&app, test::TestRequest::get().uri("/reports").to_request()).await;
    assert_eq!(second.status().as_u16(), 408);
    let body: serde_json::Value = test::read_body_json(second).await;
    assert_eq!(body["error"]["code"], 408);

    let stats = components.limiter.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.waiting, 0);

    server.stop(true).await;
}

#[actix_web::test]
async fn test_breaker_opens_and_recovers() {
    let failing = Arc::new(AtomicBool::new(true));
    let backend_failing = failing.clone();
    let (addr, server) = setup::spawn_backend(move |cfg: &mut web::ServiceConfig| {
        let failing = backend_failing.clone();
        cfg.route(
            "/orders",
            web::get().to(move || {
                let failing = failing.load(Ordering::SeqCst);
                async move {
                    if failing {
                        HttpResponse::BadGateway().finish()
                    } else {
                        HttpResponse::Ok().body("ok")
                    }
                }
            }),
        );
    })
    .await;

    let mut config = AppConfig::with_defaults();
    config.resilience.circuit_breaker.failure_threshold = 2;
    config.resilience.circuit_breaker.success_threshold = 1;
    config.resilience.circuit_breaker.recovery_timeout_ms = 200;
    config.gateway.routes.push(RouteConfig::new("GET", "/orders", "orders"));
    let components = setup::components_with(config);
    setup::healthy_instance(&components.registry, "orders", addr.port());

    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    for _ in 0..2 {
        let resp = test::call_service(&app, test::TestRequest::get().uri("/orders").to_request()).await;
        assert_eq!(resp.status().as_u16(), 500);
    }

    let resp = test::call_service(&app, test::TestRequest::get().uri("/orders").to_request()).await;
    assert_eq!(resp.status().as_u16(), 503);
    assert!(resp.headers().get("retry-after").is_some());
    assert_eq!(
        components.breakers.get("proxy-orders").unwrap().state(),
        CircuitState::Open
    );

    failing.store(false, Ordering::SeqCst);
    actix_web::rt::time::sleep(Duration::from_millis(250)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/orders").to_request()).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        components.breakers.get("proxy-orders").unwrap().state(),
        CircuitState::Closed
    );

    server.stop(true).await;
}
