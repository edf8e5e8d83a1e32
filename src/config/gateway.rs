use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{ConfigError, Validate};
use crate::discovery::ServiceRegistration;
use crate::gateway::RouteConfig;

/// Routes and services known at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Instances registered before the server starts accepting traffic
    #[serde(default)]
    pub services: Vec<ServiceRegistration>,
}

impl Validate for GatewayConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for route in &self.routes {
            route
                .validate()
                .map_err(|e| ConfigError::ValidationError(format!("gateway.routes: {}", e)))?;
            if !keys.insert(route.key()) {
                return Err(ConfigError::ValidationError(format!(
                    "gateway.routes: duplicate route {}",
                    route.key()
                )));
            }
        }

        for service in &self.services {
            if service.name.is_empty() || service.host.is_empty() {
                return Err(ConfigError::ValidationError(
                    "gateway.services: name and host are required".to_string(),
                ));
            }
        }
        Ok(())
    }
}
