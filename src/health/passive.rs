//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe request outcomes
//! - Track consecutive failures
//! - Trigger state transition on threshold breach
//!
//! # Design Decisions
//! - Connect failures, timeouts and broken upstream exchanges count as failures
//! - 5xx responses are relayed as-is and only count when configured
//! - Saturation and client disconnects never count (not a backend fault)
//! - 4xx are NOT failures (client error, not backend)

use axum::http::StatusCode;

use crate::config::HealthCheckConfig;
use crate::http::forward::ProxyError;
use crate::load_balancer::{Backend, BackendRegistry};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveHealth {
    count_server_errors: bool,
}

impl PassiveHealth {
    pub fn new(config: &HealthCheckConfig) -> Self {
        Self {
            count_server_errors: config.count_server_errors,
        }
    }

    /// Whether an attempt error should count against the backend.
    pub fn counts_as_failure(&self, err: &ProxyError) -> bool {
        match err {
            ProxyError::ConnectFailed(_) | ProxyError::Timeout(_) | ProxyError::Upstream(_) => true,
            ProxyError::BackendError(_) => self.count_server_errors,
            ProxyError::BackendSaturated(_) | ProxyError::ClientDisconnected => false,
        }
    }

    /// Feed a failed attempt.
    pub fn observe_error(&self, registry: &BackendRegistry, backend: &Backend, err: &ProxyError) {
        if self.counts_as_failure(err) {
            registry.record_failure(backend, err.kind());
        }
    }

    /// Feed a response that reached the client.
    pub fn observe_response(&self, registry: &BackendRegistry, backend: &Backend, status: StatusCode) {
        if status.is_server_error() {
            self.observe_error(registry, backend, &ProxyError::BackendError(status));
        } else {
            registry.record_success(backend);
        }
    }
}
