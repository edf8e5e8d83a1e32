use actix_web::{App, HttpServer};
use lighter_gateway::{config, observability, router, Components};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load()?;
    observability::init(&config.observability)?;

    tracing::info!(
        name = %config.app.name,
        version = %config.app.version,
        environment = %config.app.environment,
        "Starting gateway"
    );

    let components = Components::from_config(&config)?;
    let events = components.start_background();

    let server_components = components.clone();
    let server = HttpServer::new(move || {
        let components = server_components.clone();
        App::new().configure(move |app| router::route(app, &components))
    })
    .workers(config.server.workers)
    .shutdown_timeout(config.app.shutdown_timeout)
    .bind((config.server.host.as_str(), config.server.port))?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.server.workers,
        "HTTP server listening"
    );

    let result = server.run().await;

    components.stop_background(&events);
    tracing::info!("Gateway stopped");

    result.map_err(Into::into)
}
