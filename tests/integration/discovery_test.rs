use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use lighter_gateway::config::{AppConfig, WithDefaults};
use lighter_gateway::discovery::{HealthProber, HealthStatus, ProberConfig, RegistryEvent, ServiceRegistry};
use lighter_gateway::resilience::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
use lighter_gateway::testing::setup;
use tokio::sync::broadcast;

fn prober(registry: &Arc<ServiceRegistry>, interval: Duration) -> (Arc<HealthProber>, Arc<CircuitBreakerManager>) {
    let breakers = Arc::new(CircuitBreakerManager::default());
    let config = ProberConfig {
        interval,
        timeout: Duration::from_millis(300),
        breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_millis(300),
        },
    };
    let prober = Arc::new(HealthProber::new(registry.clone(), breakers.clone(), config));
    (prober, breakers)
}

async fn health_backend(body: serde_json::Value) -> (u16, actix_web::dev::ServerHandle) {
    let (addr, server) = setup::spawn_backend(move |cfg: &mut web::ServiceConfig| {
        let body = body.clone();
        cfg.route(
            "/health",
            web::get().to(move || {
                let body = body.clone();
                async move { HttpResponse::Ok().json(body) }
            }),
        );
    })
    .await;
    (addr.port(), server)
}

#[actix_web::test]
async fn test_probe_reads_reported_status() {
    let (port, server) = health_backend(serde_json::json!({ "status": "degraded" })).await;
    let registry = Arc::new(ServiceRegistry::new());
    let instance = registry.register(setup::registration("speech", port));
    let (prober, _) = prober(&registry, Duration::from_secs(60));

    let status = prober.probe_instance(&instance.id).await;
    assert_eq!(status, Some(HealthStatus::Degraded));

    let updated = registry.get(&instance.id).unwrap();
    assert_eq!(updated.status, HealthStatus::Degraded);
    assert!(updated.last_health_check_at.is_some());
    assert!(updated.response_time_ms.is_some());
    // Degraded instances are not routable.
    assert!(registry.discover("speech", &[]).is_empty());

    server.stop(true).await;
}

#[actix_web::test]
async fn test_unreachable_instance_trips_probe_breaker() {
    let registry = Arc::new(ServiceRegistry::new());
    let instance = registry.register(setup::registration("ghost", setup::closed_port()));
    let (prober, breakers) = prober(&registry, Duration::from_secs(60));

    for _ in 0..3 {
        assert_eq!(prober.probe_instance(&instance.id).await, Some(HealthStatus::Unhealthy));
    }

    let breaker = breakers.get(&HealthProber::breaker_key("ghost")).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Open breaker: no network call, still reported unhealthy.
    assert_eq!(prober.probe_instance(&instance.id).await, Some(HealthStatus::Unhealthy));
    assert_eq!(breaker.total_rejections(), 1);

    let updated = registry.get(&instance.id).unwrap();
    assert_eq!(updated.consecutive_failures, 4);

    let stats = prober.stats();
    assert_eq!(stats.total_probes, 4);
    assert_eq!(stats.failed_probes, 4);
}

#[actix_web::test]
async fn test_started_prober_probes_new_registrations() {
    let (port, server) = health_backend(serde_json::json!({ "status": "healthy" })).await;
    let registry = Arc::new(ServiceRegistry::new());
    let (prober, _) = prober(&registry, Duration::from_secs(60));
    prober.start();

    let instance = registry.register(setup::registration("users", port));

    let mut status = HealthStatus::Unknown;
    for _ in 0..50 {
        actix_web::rt::time::sleep(Duration::from_millis(20)).await;
        status = registry.get(&instance.id).unwrap().status;
        if status != HealthStatus::Unknown {
            break;
        }
    }
    assert_eq!(status, HealthStatus::Healthy);
    assert_eq!(registry.discover("users", &[]).len(), 1);

    prober.stop();
    assert!(!prober.is_running());
    server.stop(true).await;
}

#[actix_web::test]
async fn test_interval_round_marks_dead_instance_unhealthy() {
    let registry = Arc::new(ServiceRegistry::new());
    let instance = setup::healthy_instance(&registry, "billing", setup::closed_port());
    let (prober, _) = prober(&registry, Duration::from_millis(100));

    let mut events = registry.subscribe();
    prober.start();

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("no status change within the deadline")
        .unwrap();
    assert!(event.is_failure());
    assert_eq!(registry.get(&instance.id).unwrap().status, HealthStatus::Unhealthy);

    prober.stop();
}

fn drain(events: &mut broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

#[actix_web::test]
async fn test_refused_connection_flips_status_once() {
    let (port, server) = health_backend(serde_json::json!({})).await;
    let registry = Arc::new(ServiceRegistry::new());
    let instance = registry.register(setup::registration("payments", port));
    let (prober, _) = prober(&registry, Duration::from_secs(60));
    let mut events = registry.subscribe();

    for _ in 0..3 {
        assert_eq!(prober.probe_instance(&instance.id).await, Some(HealthStatus::Healthy));
    }
    let changes = drain(&mut events);
    assert_eq!(changes.len(), 1, "only unknown -> healthy");
    assert!(changes[0].is_recovery());

    server.stop(true).await;

    for _ in 0..4 {
        assert_eq!(prober.probe_instance(&instance.id).await, Some(HealthStatus::Unhealthy));
    }
    let changes = drain(&mut events);
    assert_eq!(changes.len(), 1, "repeated failures publish nothing");
    assert!(changes[0].is_failure());
    assert_eq!(registry.get(&instance.id).unwrap().consecutive_failures, 4);
}

#[actix_web::test]
async fn test_configured_services_are_checked_at_startup() {
    let (port, server) = health_backend(serde_json::json!({ "status": "healthy" })).await;

    let mut config = AppConfig::with_defaults();
    config.gateway.services.push(setup::registration("catalog", port));
    let components = setup::components_with(config);
    let instance = components.registry.by_name("catalog").remove(0);

    // Default interval is 30s, so only the startup round can get here in time.
    let events = components.start_background();

    let mut status = HealthStatus::Unknown;
    for _ in 0..50 {
        actix_web::rt::time::sleep(Duration::from_millis(20)).await;
        status = components.registry.get(&instance.id).unwrap().status;
        if status != HealthStatus::Unknown {
            break;
        }
    }
    assert_eq!(status, HealthStatus::Healthy);
    assert_eq!(components.registry.discover("catalog", &[]).len(), 1);

    components.stop_background(&events);
    server.stop(true).await;
}
