use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web::web::ServiceConfig;
use actix_web::{App, HttpServer};

use crate::components::Components;
use crate::config::{AppConfig, WithDefaults};
use crate::discovery::{HealthStatus, ServiceInstance, ServiceRegistration, ServiceRegistry};

/// Starts a real HTTP backend on an ephemeral localhost port
///
/// The returned handle stops the server; tests should call
/// `handle.stop(true).await` when done.
///
/// # Example
/// ```no_run
/// use actix_web::{web, HttpResponse};
/// use lighter_gateway::testing::setup;
///
/// #[actix_web::test]
/// async fn test_something() {
///     let (addr, server) = setup::spawn_backend(|cfg: &mut web::ServiceConfig| {
///         cfg.route("/health", web::get().to(HttpResponse::Ok));
///     })
///     .await;
///     // point an instance at addr.port()
///     server.stop(true).await;
/// }
/// ```
pub async fn spawn_backend<F>(configure: F) -> (SocketAddr, ServerHandle)
where
    F: Fn(&mut ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || App::new().configure(configure.clone()))
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .expect("Failed to bind test backend");

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    (addr, handle)
}

/// A localhost port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port");
    let port = listener.local_addr().expect("Listener has no address").port();
    drop(listener);
    port
}

/// Registration for `name` on localhost at `port`
pub fn registration(name: &str, port: u16) -> ServiceRegistration {
    ServiceRegistration {
        id: None,
        name: name.to_string(),
        version: "1.0.0".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        scheme: Default::default(),
        health_path: "/health".to_string(),
        tags: Vec::new(),
        dependencies: Vec::new(),
        metadata: Default::default(),
    }
}

/// Register an instance and mark it healthy without probing
pub fn healthy_instance(registry: &ServiceRegistry, name: &str, port: u16) -> ServiceInstance {
    let instance = registry.register(registration(name, port));
    registry.update_health(name, &instance.id, HealthStatus::Healthy, None);
    registry.get(&instance.id).unwrap_or(instance)
}

/// Components built from the default configuration with metrics disabled
pub fn components() -> Components {
    components_with(AppConfig::with_defaults())
}

pub fn components_with(mut config: AppConfig) -> Components {
    config.observability.metrics_enabled = false;
    Components::from_config(&config).expect("Failed to build components")
}

pub fn shared_registry() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new())
}
