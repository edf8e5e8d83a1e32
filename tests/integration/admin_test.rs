use actix_web::{test, App};
use lighter_gateway::config::{AppConfig, WithDefaults};
use lighter_gateway::gateway::RouteConfig;
use lighter_gateway::testing::setup;
use lighter_gateway::{router, Components};

#[actix_web::test]
async fn test_service_lifecycle_through_admin_api() {
    let components = setup::components();
    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/services/register")
        .set_json(serde_json::json!({
            "id": "inventory-1",
            "name": "inventory",
            "host": "127.0.0.1",
            "port": setup::closed_port(),
            "healthPath": "status",
            "tags": ["eu"],
            "dependencies": ["catalog"],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);
    let instance: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(instance["healthPath"], "/status");

    let req = test::TestRequest::get()
        .uri("/api/v1/services?name=inventory&status=unknown")
        .to_request();
    let listed: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.len(), 1);

    // Not probed yet, so nothing is routable.
    let req = test::TestRequest::get()
        .uri("/api/v1/services/discover/inventory?tags=eu")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 503);

    let req = test::TestRequest::get()
        .uri("/api/v1/services/inventory/dependencies")
        .to_request();
    let report: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["dependencies"]["catalog"], false);

    let req = test::TestRequest::delete()
        .uri("/api/v1/services/inventory/inventory-1")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 204);
    assert!(components.registry.is_empty());
}

#[actix_web::test]
async fn test_breaker_and_limiter_views() {
    let mut config = AppConfig::with_defaults();
    config.gateway.routes.push(RouteConfig::new("GET", "/api/orders", "orders"));
    let components = setup::components_with(config);
    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    // No instance: admitted by the limiter, then 503 from the gateway.
    let req = test::TestRequest::get().uri("/api/orders").to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 503);

    let req = test::TestRequest::get().uri("/api/v1/rate-limits").to_request();
    let overview: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(overview["stats"]["admitted"], 1);
    let key = overview["keys"][0]["key"].as_str().unwrap().to_string();
    assert_eq!(key, "GET:/api/orders:unknown");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/rate-limits/{}/reset", key))
        .to_request();
    let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["count"], 0);

    let req = test::TestRequest::get().uri("/api/v1/circuit-breakers/health").to_request();
    let summary: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary["healthStatus"], "healthy");

    let req = test::TestRequest::post()
        .uri("/api/v1/circuit-breakers/proxy-orders/reset")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 404);
}

#[actix_web::test]
async fn test_metrics_and_docs_are_served() {
    let components = Components::from_config(&AppConfig::with_defaults()).unwrap();
    let app = test::init_service(App::new().configure(|cfg| router::route(cfg, &components))).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);

    let req = test::TestRequest::get().uri("/api.json").to_request();
    let document: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(document["paths"]["/api/v1/services/register"].is_object());
}
