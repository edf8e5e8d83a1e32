use actix_web::web::{self, PayloadConfig, ServiceConfig};
use actix_web::get;
use utoipa::OpenApi;
use utoipa_swagger_ui::{SwaggerUi, Url};

use crate::api::Definition;
use crate::components::Components;
use crate::controllers;
use crate::gateway::MAX_RESPONSE_BODY;

pub fn route(app: &mut ServiceConfig, components: &Components) {
    components.app_data(app);
    app.app_data(PayloadConfig::new(MAX_RESPONSE_BODY));
    app.service(index);

    // Services; fixed segments before `{id}`
    app.service(controllers::v1::services::index);
    app.service(controllers::v1::services::register);
    app.service(controllers::v1::services::stats);
    app.service(controllers::v1::services::discover);
    app.service(controllers::v1::services::dependencies);
    app.service(controllers::v1::services::show);
    app.service(controllers::v1::services::deregister);
    // Circuit breakers
    app.service(controllers::v1::circuit_breakers::index);
    app.service(controllers::v1::circuit_breakers::health);
    app.service(controllers::v1::circuit_breakers::reset_all);
    app.service(controllers::v1::circuit_breakers::reset);
    // Rate limits
    app.service(controllers::v1::rate_limits::index);
    app.service(controllers::v1::rate_limits::reset);

    // Health check endpoints
    app.service(controllers::health::health);
    app.service(controllers::health::ready);

    if components.metrics.is_some() {
        app.service(controllers::metrics::metrics);
    }

    app.service(web::redirect("/docs", "/docs/"));
    app.service(SwaggerUi::new("/docs/{_:.*}").urls(vec![(
        Url::new("Gateway", "/api.json"),
        Definition::openapi(),
    )]));

    // must be last: everything else is gateway traffic
    app.default_service(web::to(controllers::gateway::proxy));
}

#[get("/")]
pub async fn index() -> &'static str {
    "lighter-gateway"
}
