//! In-memory service registry
//!
//! Instances are grouped by logical service name and kept in registration
//! order. Health state is written only through [`ServiceRegistry::update_health`];
//! every status change is published as a [`RegistryEvent`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

use super::instance::{HealthStatus, ServiceInstance, ServiceRegistration};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service {0} is not registered")]
    NotFound(String),

    #[error("Service {service} has unavailable dependencies: {}", missing.join(", "))]
    DependencyUnavailable { service: String, missing: Vec<String> },
}

/// Registry change notification
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Registered(ServiceInstance),
    Deregistered {
        name: String,
        id: String,
    },
    StatusChanged {
        name: String,
        id: String,
        from: HealthStatus,
        to: HealthStatus,
    },
}

impl RegistryEvent {
    /// A status change into `healthy` from anything else
    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            RegistryEvent::StatusChanged { from, to: HealthStatus::Healthy, .. }
                if *from != HealthStatus::Healthy
        )
    }

    /// A status change into `unhealthy`
    pub fn is_failure(&self) -> bool {
        matches!(self, RegistryEvent::StatusChanged { to: HealthStatus::Unhealthy, .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Distinct service names
    pub total_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_tag: BTreeMap<String, usize>,
    /// Mean of the last probe latency over instances that have one
    pub average_response_time_ms: f64,
}

pub struct ServiceRegistry {
    services: DashMap<String, Vec<ServiceInstance>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Upsert an instance by id within its name; status starts as `unknown`.
    ///
    /// Subscribers receive [`RegistryEvent::Registered`], which the health
    /// prober answers with an immediate probe.
    #[tracing::instrument(skip(self, registration), fields(service = %registration.name))]
    pub fn register(&self, registration: ServiceRegistration) -> ServiceInstance {
        let instance = ServiceInstance::from(registration);

        {
            let mut instances = self.services.entry(instance.name.clone()).or_default();
            instances.retain(|existing| existing.id != instance.id);
            instances.push(instance.clone());
        }

        tracing::info!(
            instance_id = %instance.id,
            url = %instance.base_url(),
            "Service instance registered"
        );
        let _ = self.events.send(RegistryEvent::Registered(instance.clone()));

        instance
    }

    /// Remove an instance. Returns false when it was not registered.
    pub fn deregister(&self, name: &str, id: &str) -> bool {
        let removed = match self.services.get_mut(name) {
            Some(mut instances) => {
                let before = instances.len();
                instances.retain(|instance| instance.id != id);
                before != instances.len()
            }
            None => false,
        };
        self.services.remove_if(name, |_, instances| instances.is_empty());

        if removed {
            tracing::info!(service = %name, instance_id = %id, "Service instance deregistered");
            let _ = self.events.send(RegistryEvent::Deregistered {
                name: name.to_string(),
                id: id.to_string(),
            });
        }
        removed
    }

    /// Healthy instances of `name` carrying every tag in `tags`
    pub fn discover(&self, name: &str, tags: &[String]) -> Vec<ServiceInstance> {
        self.services
            .get(name)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|instance| instance.is_healthy() && instance.has_tags(tags))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Availability of each dependency declared by the first instance of `name`
    pub fn check_dependencies(&self, name: &str) -> BTreeMap<String, bool> {
        let dependencies = match self.services.get(name) {
            Some(instances) => match instances.first() {
                Some(instance) => instance.dependencies.clone(),
                None => return BTreeMap::new(),
            },
            None => return BTreeMap::new(),
        };

        dependencies
            .into_iter()
            .map(|dependency| {
                let available = self.is_available(&dependency);
                (dependency, available)
            })
            .collect()
    }

    /// Fails with the list of dependencies that have no healthy instance
    pub fn require_dependencies(&self, name: &str) -> Result<(), RegistryError> {
        if !self.services.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        let missing: Vec<String> = self
            .check_dependencies(name)
            .into_iter()
            .filter(|(_, available)| !available)
            .map(|(dependency, _)| dependency)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::DependencyUnavailable {
                service: name.to_string(),
                missing,
            })
        }
    }

    /// Write a probe result back. No-op when the instance is gone.
    ///
    /// Returns the previous status when it changed.
    pub fn update_health(
        &self,
        name: &str,
        id: &str,
        status: HealthStatus,
        response_time: Option<Duration>,
    ) -> Option<HealthStatus> {
        let mut instances = self.services.get_mut(name)?;
        let instance = instances.iter_mut().find(|instance| instance.id == id)?;

        let previous = instance.status;
        instance.status = status;
        instance.last_health_check_at = Some(Utc::now());
        if status == HealthStatus::Unhealthy {
            instance.consecutive_failures += 1;
        } else {
            instance.consecutive_failures = 0;
            instance.response_time_ms = response_time.map(|elapsed| elapsed.as_micros() as f64 / 1000.0);
        }

        if previous == status {
            return None;
        }

        // Sent while the shard lock is held so changes to one instance are
        // published in the order they happened.
        let _ = self.events.send(RegistryEvent::StatusChanged {
            name: name.to_string(),
            id: id.to_string(),
            from: previous,
            to: status,
        });
        Some(previous)
    }

    pub fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.services
            .iter()
            .find_map(|entry| entry.value().iter().find(|instance| instance.id == id).cloned())
    }

    /// Every instance, grouped by name in name order
    pub fn all(&self) -> Vec<ServiceInstance> {
        let mut groups: Vec<(String, Vec<ServiceInstance>)> = self
            .services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups.into_iter().flat_map(|(_, instances)| instances).collect()
    }

    /// Every instance of `name`, whatever its status
    pub fn by_name(&self, name: &str) -> Vec<ServiceInstance> {
        self.services
            .get(name)
            .map(|instances| instances.clone())
            .unwrap_or_default()
    }

    /// Every instance carrying `tag`, whatever its status
    pub fn by_tag(&self, tag: &str) -> Vec<ServiceInstance> {
        self.all()
            .into_iter()
            .filter(|instance| instance.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// At least one healthy instance of `name` exists
    pub fn is_available(&self, name: &str) -> bool {
        self.services
            .get(name)
            .map(|instances| instances.iter().any(ServiceInstance::is_healthy))
            .unwrap_or(false)
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let instances = self.all();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_tag: BTreeMap<String, usize> = BTreeMap::new();
        let mut response_times = Vec::new();

        for instance in &instances {
            *by_status.entry(instance.status.to_string()).or_default() += 1;
            for tag in &instance.tags {
                *by_tag.entry(tag.clone()).or_default() += 1;
            }
            if let Some(elapsed) = instance.response_time_ms {
                response_times.push(elapsed);
            }
        }

        let average_response_time_ms = if response_times.is_empty() {
            0.0
        } else {
            response_times.iter().sum::<f64>() / response_times.len() as f64
        };

        RegistryStats {
            total_services: self.services.len(),
            total_instances: instances.len(),
            healthy_instances: by_status.get("healthy").copied().unwrap_or(0),
            unhealthy_instances: by_status.get("unhealthy").copied().unwrap_or(0),
            by_status,
            by_tag,
            average_response_time_ms,
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
