//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Ordered backend endpoints. Order is the round-robin order.
    pub backends: Vec<BackendConfig>,

    /// Selection policy.
    pub balancer: BalancerConfig,

    /// Health tracking settings (passive thresholds, cool-down, active probe).
    pub health_check: HealthCheckConfig,

    /// Per-attempt timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Replace the port of the bind address, keeping the host part.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind_address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.bind_address.clone(),
        };
        self.bind_address = format!("{}:{}", host, port);
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Endpoint URL in `scheme://host:port` form.
    pub url: String,

    /// Weight for weighted round-robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent connections to this backend.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,

    /// Requests allowed to wait for a connection slot once the pool is full.
    /// Zero means fail fast.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl BackendConfig {
    /// Backend config with default weight and pool limits.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: default_weight(),
            max_connections: default_max_backend_conns(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_backend_conns() -> usize {
    100
}

fn default_queue_depth() -> usize {
    64
}

/// Selection policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerAlgorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub algorithm: BalancerAlgorithm,
}

/// Health tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive probe successes before marking healthy.
    pub healthy_threshold: u32,

    /// Seconds after the last failure before an unhealthy backend is
    /// put back into rotation. Zero disables cool-down recovery.
    pub cooldown_secs: u64,

    /// Treat all backends as eligible when every one is unhealthy.
    pub fail_open: bool,

    /// Count 5xx responses toward the failure threshold.
    pub count_server_errors: bool,

    /// Enable active health checks.
    pub active_enabled: bool,

    /// Active probe interval in seconds.
    pub interval_secs: u64,

    /// Active probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for active health checks.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
            cooldown_secs: 10,
            fail_open: true,
            count_server_errors: false,
            active_enabled: false,
            interval_secs: 10,
            timeout_secs: 2,
            path: "/health".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn cooldown(&self) -> Option<Duration> {
        (self.cooldown_secs > 0).then(|| Duration::from_secs(self.cooldown_secs))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Timeout configuration for backend attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Attempt timeout (connect through response head) in seconds.
    pub attempt_secs: u64,

    /// Maximum wait for a pooled connection slot in milliseconds.
    pub queue_ms: u64,

    /// Longest gap between response body chunks before the backend is
    /// considered stalled, in milliseconds.
    pub read_idle_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 1000,
            attempt_secs: 30,
            queue_ms: 1000,
            read_idle_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one fails.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Request bodies up to this size are buffered so they can be replayed.
    pub replay_buffer_bytes: usize,

    /// Retry timed-out attempts of non-idempotent methods (POST, PATCH) too.
    pub retry_non_idempotent_timeouts: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 0,
            max_delay_ms: 100,
            replay_buffer_bytes: 1024 * 1024,
            retry_non_idempotent_timeouts: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:9091".to_string(),
        }
    }
}
