//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration and apply command-line overrides
//! - Initialize subsystems in dependency order
//! - Start background tasks (admin API, health checks, config watcher)
//! - Serve until a signal arrives, then shut down gracefully
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The proxy listener is bound before traffic is accepted

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::admin;
use crate::config::{
    check_resolvable, read_config, validate_config, BackendConfig, ConfigError, ListenerConfig,
    ProxyConfig,
};
use crate::config::watcher::ConfigWatcher;
use crate::http::{Dispatcher, HttpServer};
use crate::lifecycle::{shutdown::Shutdown, signals};
use crate::net::{self, ListenerError};
use crate::observability::{self, LoggingError};

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Errors that stop the process before (or instead of) serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("metrics exporter failed: {0}")]
    Metrics(String),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub backends: Vec<String>,
}

/// Build the effective configuration: file (or defaults), then overrides,
/// then validation and DNS resolution of every backend.
pub async fn prepare_config(options: &StartupOptions) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &options.config_path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(port) = options.port {
        config.listener.set_port(port);
    }
    if !options.backends.is_empty() {
        config.backends = options.backends.iter().map(BackendConfig::new).collect();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    check_resolvable(&config.backends).await?;
    Ok(config)
}

/// Run the dispatcher until SIGINT/SIGTERM.
pub async fn run(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    observability::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dispatch-proxy starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|e| StartupError::Metrics(format!("invalid address: {}", e)))?;
        observability::init_metrics(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
    }

    let listener = net::bind(&config.listener).await?;
    let dispatcher = Arc::new(Dispatcher::from_config(&config)?);
    tracing::info!(
        backends = dispatcher.registry().all().len(),
        balancer = dispatcher.balancer_name(),
        "Backend registry ready"
    );

    let shutdown = Shutdown::new();

    if config.admin.enabled {
        let admin_listener = net::bind(&ListenerConfig {
            bind_address: config.admin.bind_address.clone(),
        })
        .await?;
        let admin_dispatcher = dispatcher.clone();
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_listener, admin_dispatcher, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    // The watcher handle must outlive the server.
    let (config_updates, _watcher) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, path = ?path, "Config hot reload disabled");
                    (updates, None)
                }
            }
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let server = HttpServer::with_dispatcher(config, dispatcher.clone());
    let mut server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    tokio::select! {
        _ = signals::wait_for_signal() => {}
        result = &mut server_task => {
            shutdown.trigger();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(StartupError::Serve(e)),
                Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
            };
        }
    }

    shutdown.trigger();
    shutdown.drain(dispatcher.in_flight(), DRAIN_GRACE).await;

    match tokio::time::timeout(DRAIN_GRACE, server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server stopped with an error"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Err(_) => tracing::warn!("Connections still open after the drain deadline, exiting"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
