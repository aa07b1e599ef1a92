//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events for one save, so a reloaded
//! configuration is only published when its backend list differs from the
//! last one sent.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{BackendConfig, ProxyConfig};

/// Watches the configuration file and sends validated configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let publisher = Publisher {
            path: self.path.clone(),
            tx: self.update_tx,
            last: Mutex::new(load_config(&self.path).ok().map(|c| c.backends)),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    publisher.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

struct Publisher {
    path: PathBuf,
    tx: mpsc::UnboundedSender<ProxyConfig>,
    last: Mutex<Option<Vec<BackendConfig>>>,
}

impl Publisher {
    /// Load the file and send it if valid and changed. Returns whether it was sent.
    fn reload(&self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    path = ?self.path,
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
                return false;
            }
        };

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if last.as_ref() == Some(&config.backends) {
            tracing::debug!(path = ?self.path, "Config file touched, backend list unchanged");
            return false;
        }

        tracing::info!(
            path = ?self.path,
            backends = config.backends.len(),
            "Config file change detected, publishing reload"
        );
        *last = Some(config.backends.clone());
        self.tx.send(config).is_ok()
    }
}
