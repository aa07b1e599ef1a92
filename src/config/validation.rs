//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend endpoint URLs and reject duplicates
//! - Validate value ranges (timeouts > 0, thresholds > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - DNS resolution is a separate async step run at startup and reload

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::load_balancer::backend::{parse_endpoint, BackendId, EndpointError};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend `{url}`: {reason}")]
    InvalidBackend { url: String, reason: EndpointError },

    #[error("backend `{0}` is listed more than once")]
    DuplicateBackend(String),

    #[error("backend `{url}`: {field} must be greater than zero")]
    ZeroBackendLimit { url: String, field: &'static str },

    #[error("{field} `{value}` is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("health check path `{0}` must start with `/`")]
    InvalidHealthPath(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    errors.extend(validate_backends(&config.backends));

    let health = &config.health_check;
    if health.unhealthy_threshold == 0 {
        errors.push(ValidationError::Zero("health_check.unhealthy_threshold"));
    }
    if health.healthy_threshold == 0 {
        errors.push(ValidationError::Zero("health_check.healthy_threshold"));
    }
    if health.active_enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::Zero("health_check.interval_secs"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::Zero("health_check.timeout_secs"));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::InvalidHealthPath(health.path.clone()));
        }
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_ms"));
    }
    if config.timeouts.attempt_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.attempt_secs"));
    }
    if config.timeouts.read_idle_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.read_idle_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the backend list on its own (used by reloads too).
pub fn validate_backends(backends: &[BackendConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if backends.is_empty() {
        errors.push(ValidationError::NoBackends);
        return errors;
    }

    let mut seen = HashSet::new();
    for backend in backends {
        match parse_endpoint(&backend.url) {
            Ok(url) => {
                let id = BackendId::from_url(&url);
                if !seen.insert(id.clone()) {
                    errors.push(ValidationError::DuplicateBackend(id.to_string()));
                }
            }
            Err(reason) => errors.push(ValidationError::InvalidBackend {
                url: backend.url.clone(),
                reason,
            }),
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroBackendLimit {
                url: backend.url.clone(),
                field: "weight",
            });
        }
        if backend.max_connections == 0 {
            errors.push(ValidationError::ZeroBackendLimit {
                url: backend.url.clone(),
                field: "max_connections",
            });
        }
    }
    errors
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Resolve every backend host once so typos fail at startup instead of per request.
pub async fn check_resolvable(backends: &[BackendConfig]) -> Result<(), ConfigError> {
    for backend in backends {
        let url = parse_endpoint(&backend.url).map_err(|reason| ConfigError::InvalidBackend {
            url: backend.url.clone(),
            reason,
        })?;
        let id = BackendId::from_url(&url);
        let host = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(80);

        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ConfigError::Unresolvable {
                backend: id.to_string(),
                reason: e.to_string(),
            })?;
        if addrs.next().is_none() {
            return Err(ConfigError::Unresolvable {
                backend: id.to_string(),
                reason: "no addresses returned".to_string(),
            });
        }
    }
    Ok(())
}
