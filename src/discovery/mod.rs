//! Service discovery: the instance registry and the health prober that keeps
//! its status current.

mod instance;
mod prober;
mod registry;

pub use instance::{HealthStatus, InstanceMetadata, Scheme, ServiceInstance, ServiceRegistration};
pub use prober::{evaluate, HealthProber, ProbeError, ProberConfig, ProberStats};
pub use registry::{RegistryError, RegistryEvent, RegistryStats, ServiceRegistry};
