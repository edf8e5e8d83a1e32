use std::collections::BTreeMap;

use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, post, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::balancer::LoadBalancer;
use crate::discovery::{HealthStatus, RegistryStats, ServiceInstance, ServiceRegistration, ServiceRegistry};
use crate::error::GatewayError;

/// Filters for the instance listing
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ServiceQuery {
    /// Logical service name
    pub name: Option<String>,
    /// Instances carrying this tag
    pub tag: Option<String>,
    pub status: Option<HealthStatus>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DiscoverQuery {
    /// Comma separated tags every candidate must carry
    pub tags: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub service: String,
    /// Dependency name to availability
    pub dependencies: BTreeMap<String, bool>,
    pub all_available: bool,
}

/// List registered instances
#[utoipa::path(
    tag = "Services",
    params(ServiceQuery),
    responses(
        (status = 200, description = "Registered instances", body = [ServiceInstance]),
    )
)]
#[get("/api/v1/services")]
pub async fn index(registry: Data<ServiceRegistry>, Query(query): Query<ServiceQuery>) -> impl Responder {
    let instances: Vec<ServiceInstance> = registry
        .all()
        .into_iter()
        .filter(|instance| query.name.as_ref().is_none_or(|name| &instance.name == name))
        .filter(|instance| query.tag.as_ref().is_none_or(|tag| instance.tags.contains(tag)))
        .filter(|instance| query.status.is_none_or(|status| instance.status == status))
        .collect();

    Json(instances)
}

/// Register an instance
///
/// Re-registering an existing id replaces the instance and resets its status.
#[utoipa::path(
    tag = "Services",
    request_body = ServiceRegistration,
    responses(
        (status = 201, description = "Instance registered", body = ServiceInstance),
        (status = 400, description = "Invalid registration", body = crate::error::ErrorEnvelope),
    )
)]
#[post("/api/v1/services/register")]
pub async fn register(
    registry: Data<ServiceRegistry>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<impl Responder, GatewayError> {
    if registration.name.trim().is_empty() || registration.host.trim().is_empty() {
        return Err(GatewayError::BadRequest("name and host are required".to_string()));
    }
    if registration.port == 0 {
        return Err(GatewayError::BadRequest("port must be > 0".to_string()));
    }

    let instance = registry.register(registration);
    Ok(HttpResponse::Created().json(instance))
}

/// Registry totals
#[utoipa::path(
    tag = "Services",
    responses(
        (status = 200, description = "Registry statistics", body = RegistryStats),
    )
)]
#[get("/api/v1/services/stats")]
pub async fn stats(registry: Data<ServiceRegistry>) -> impl Responder {
    Json(registry.stats())
}

/// Pick one healthy instance with the load balancer
#[utoipa::path(
    tag = "Services",
    params(
        ("name" = String, Path, description = "Logical service name"),
        DiscoverQuery,
    ),
    responses(
        (status = 200, description = "Selected instance", body = ServiceInstance),
        (status = 503, description = "No healthy instance", body = crate::error::ErrorEnvelope),
    )
)]
#[get("/api/v1/services/discover/{name}")]
pub async fn discover(
    balancer: Data<LoadBalancer>,
    name: Path<String>,
    Query(query): Query<DiscoverQuery>,
) -> Result<impl Responder, GatewayError> {
    let name = name.into_inner();
    let tags: Vec<String> = query
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();

    balancer
        .pick(&name, &tags)
        .map(Json)
        .ok_or(GatewayError::ServiceUnavailable(name))
}

/// Availability of a service's declared dependencies
#[utoipa::path(
    tag = "Services",
    params(("name" = String, Path, description = "Logical service name")),
    responses(
        (status = 200, description = "Dependency availability", body = DependencyReport),
        (status = 404, description = "Service not registered", body = crate::error::ErrorEnvelope),
    )
)]
#[get("/api/v1/services/{name}/dependencies")]
pub async fn dependencies(
    registry: Data<ServiceRegistry>,
    name: Path<String>,
) -> Result<impl Responder, GatewayError> {
    let name = name.into_inner();
    if registry.by_name(&name).is_empty() {
        return Err(GatewayError::NotFound(format!("service {}", name)));
    }

    let dependencies = registry.check_dependencies(&name);
    let all_available = dependencies.values().all(|available| *available);
    Ok(Json(DependencyReport {
        service: name,
        dependencies,
        all_available,
    }))
}

/// Show one instance
#[utoipa::path(
    tag = "Services",
    params(("id" = String, Path, description = "Instance id")),
    responses(
        (status = 200, description = "Instance", body = ServiceInstance),
        (status = 404, description = "Unknown instance", body = crate::error::ErrorEnvelope),
    )
)]
#[get("/api/v1/services/{id}")]
pub async fn show(registry: Data<ServiceRegistry>, id: Path<String>) -> Result<impl Responder, GatewayError> {
    let id = id.into_inner();
    registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("instance {}", id)))
}

/// Deregister an instance
#[utoipa::path(
    tag = "Services",
    params(
        ("name" = String, Path, description = "Logical service name"),
        ("id" = String, Path, description = "Instance id"),
    ),
    responses(
        (status = 204, description = "Instance removed"),
        (status = 404, description = "Unknown instance", body = crate::error::ErrorEnvelope),
    )
)]
#[delete("/api/v1/services/{name}/{id}")]
pub async fn deregister(
    registry: Data<ServiceRegistry>,
    path: Path<(String, String)>,
) -> Result<impl Responder, GatewayError> {
    let (name, id) = path.into_inner();
    if registry.deregister(&name, &id) {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(GatewayError::NotFound(format!("instance {} of {}", id, name)))
    }
}
