//! Configuration loading and validation
//!
//! Loading tests read config/default.toml from the crate root and mutate
//! process environment variables, so they run serially.

use lighter_gateway::config::*;
use lighter_gateway::Strategy;
use serial_test::serial;
use std::env;
use std::time::Duration;

mod utils {
    /// Clean up environment variables with LIGHTER_GATEWAY prefix
    pub fn clean_env_vars() {
        let keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("LIGHTER_GATEWAY"))
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            unsafe { std::env::remove_var(&key) };
        }
        unsafe { std::env::remove_var("APP_ENV") };
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
#[serial]
fn test_load_default_config_success() {
    utils::clean_env_vars();

    let config = load();
    assert!(config.is_ok(), "Failed to load default configuration: {:?}", config.err());
    let config = config.unwrap();

    assert_eq!(config.app.name, "lighter-gateway");
    assert_eq!(config.app.environment, "development");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.discovery.probe_interval(), Duration::from_secs(30));
    assert_eq!(config.load_balancer.strategy, Strategy::HealthBased);
    assert_eq!(config.rate_limit.max_requests, 100);
    assert!(config.gateway.routes.is_empty());

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_environment_file_adds_routes_and_services() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "test") };

    let config = load().unwrap();

    assert!(!config.observability.metrics_enabled);
    assert_eq!(config.discovery.probe_timeout(), Duration::from_millis(500));
    assert_eq!(config.gateway.routes.len(), 1);

    let route = &config.gateway.routes[0];
    assert_eq!(route.key(), "GET:/api/users");
    assert_eq!(route.service_name, "users");
    assert_eq!(route.timeout(), Duration::from_secs(2));

    assert_eq!(config.gateway.services[0].id.as_deref(), Some("users-1"));
    assert_eq!(config.gateway.services[0].port, 9100);

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_environment_variable_override() {
    utils::clean_env_vars();
    unsafe {
        env::set_var("LIGHTER_GATEWAY__SERVER__PORT", "9999");
        env::set_var("LIGHTER_GATEWAY__LOAD_BALANCER__STRATEGY", "least_connections");
        env::set_var("LIGHTER_GATEWAY__RATE_LIMIT__MAX_REQUESTS", "7");
    }

    let config = load().unwrap();

    assert_eq!(config.server.port, 9999, "Port should be overridden by env var");
    assert_eq!(config.load_balancer.strategy, Strategy::LeastConnections);
    assert_eq!(config.rate_limit.max_requests, 7);

    utils::clean_env_vars();
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_defaults_are_valid() {
    assert!(AppConfig::with_defaults().validate().is_ok());
}

#[test]
fn test_validation_empty_app_name() {
    let mut config = AppConfig::with_defaults();
    config.app.name = "".to_string();

    match config.validate() {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("app.name")),
        other => panic!("Expected ValidationError for empty app name, got {:?}", other),
    }
}

#[test]
fn test_validation_probe_timeout_longer_than_interval() {
    let mut config = AppConfig::with_defaults();
    config.discovery.probe_interval_ms = 1000;
    config.discovery.probe_timeout_ms = 5000;

    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_zero_thresholds() {
    let mut config = AppConfig::with_defaults();
    config.resilience.circuit_breaker.failure_threshold = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::with_defaults();
    config.rate_limit.max_requests = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_duplicate_routes() {
    let mut config = AppConfig::with_defaults();
    let route = lighter_gateway::RouteConfig::new("GET", "/api/users", "users");
    config.gateway.routes.push(route.clone());
    config.gateway.routes.push(route);

    match config.validate() {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("duplicate")),
        other => panic!("Expected duplicate route error, got {:?}", other),
    }
}
