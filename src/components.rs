//! Explicit construction of the shared components from configuration.

use std::sync::Arc;

use actix_web::web::{Data, ServiceConfig};

use crate::balancer::LoadBalancer;
use crate::config::AppConfig;
use crate::discovery::{HealthProber, ProberConfig, ServiceRegistry};
use crate::events::EventLogger;
use crate::gateway::Gateway;
use crate::metrics::AppMetrics;
use crate::rate_limit::RateLimiter;
use crate::resilience::CircuitBreakerManager;

#[derive(Clone)]
pub struct Components {
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub prober: Arc<HealthProber>,
    pub balancer: Arc<LoadBalancer>,
    pub limiter: Arc<RateLimiter>,
    pub gateway: Arc<Gateway>,
    pub metrics: Option<AppMetrics>,
}

impl Components {
    /// Build every component and load the configured routes and services
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(ServiceRegistry::new());
        let breakers = Arc::new(CircuitBreakerManager::new(
            (&config.resilience.circuit_breaker).into(),
        ));
        let prober = Arc::new(HealthProber::new(
            registry.clone(),
            breakers.clone(),
            ProberConfig::from(&config.discovery),
        ));
        let balancer = Arc::new(LoadBalancer::new(registry.clone(), config.load_balancer.strategy));
        let limiter = Arc::new(RateLimiter::new((&config.rate_limit).into()));
        let gateway = Arc::new(Gateway::new(balancer.clone(), breakers.clone(), limiter.clone()));

        for route in &config.gateway.routes {
            gateway.register_route(route.clone())?;
        }
        for service in &config.gateway.services {
            registry.register(service.clone());
        }

        let metrics = config
            .observability
            .metrics_enabled
            .then(|| AppMetrics::with_config(Some(config)));

        tracing::info!(
            routes = config.gateway.routes.len(),
            services = config.gateway.services.len(),
            strategy = %config.load_balancer.strategy,
            "Components initialized"
        );

        Ok(Self {
            registry,
            breakers,
            prober,
            balancer,
            limiter,
            gateway,
            metrics,
        })
    }

    /// Share the components with request handlers
    pub fn app_data(&self, app: &mut ServiceConfig) {
        app.app_data(Data::from(self.registry.clone()));
        app.app_data(Data::from(self.breakers.clone()));
        app.app_data(Data::from(self.prober.clone()));
        app.app_data(Data::from(self.balancer.clone()));
        app.app_data(Data::from(self.limiter.clone()));
        app.app_data(Data::from(self.gateway.clone()));
        if let Some(metrics) = &self.metrics {
            app.app_data(Data::new(metrics.clone()));
        }
    }

    /// Start probing, expired-window purging and event logging. Must run
    /// inside the actix runtime.
    pub fn start_background(&self) -> EventLogger {
        self.prober.start();
        self.limiter.start_cleanup();
        EventLogger::start(&self.breakers, &self.registry)
    }

    pub fn stop_background(&self, events: &EventLogger) {
        self.prober.stop();
        self.limiter.stop_cleanup();
        events.stop();
        tracing::info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WithDefaults;
    use crate::gateway::RouteConfig;

    #[actix_web::test]
    async fn test_from_config_loads_routes_and_services() {
        let mut config = AppConfig::with_defaults();
        config.observability.metrics_enabled = false;
        config.gateway.routes.push(RouteConfig::new("GET", "/api/users", "users"));
        config.gateway.services.push(
            serde_json::from_value(serde_json::json!({
                "name": "users",
                "host": "127.0.0.1",
                "port": 9000,
            }))
            .unwrap(),
        );

        let components = Components::from_config(&config).unwrap();

        assert!(components.gateway.route("GET", "/api/users").is_some());
        assert_eq!(components.registry.by_name("users").len(), 1);
        assert!(components.metrics.is_none());

        let events = components.start_background();
        assert!(components.prober.is_running());
        components.stop_background(&events);
        assert!(!components.prober.is_running());
    }
}
