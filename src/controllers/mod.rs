pub mod gateway;
pub mod health;
pub mod metrics;
pub mod v1;
