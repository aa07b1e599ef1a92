//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or CLI flags
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, DNS resolution at startup)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → backend list handed to BackendRegistry::reconfigure (atomic swap)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the backend list is hot-reloadable
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use validation::{check_resolvable, validate_config, ValidationError};
pub use schema::{
    AdminConfig, BackendConfig, BalancerAlgorithm, BalancerConfig, HealthCheckConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, RetryConfig, TimeoutConfig,
};
