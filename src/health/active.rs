//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::http::forward::UpstreamClient;
use crate::load_balancer::{Backend, BackendRegistry};

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: UpstreamClient,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        config: HealthCheckConfig,
        client: UpstreamClient,
    ) -> Self {
        Self {
            registry,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.active_enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every registered backend once, concurrently.
    pub async fn check_all(&self) {
        let backends = self.registry.all();
        join_all(backends.iter().map(|backend| self.check(backend))).await;
    }

    async fn check(&self, backend: &Arc<Backend>) {
        let healthy = self.probe(backend, self.config.timeout()).await;
        if healthy {
            self.registry.record_probe_success(backend);
        } else {
            self.registry.record_probe_failure(backend);
        }
    }

    async fn probe(&self, backend: &Backend, timeout: Duration) -> bool {
        let uri = format!("{}://{}{}", backend.scheme, backend.authority, self.config.path);
        let request = match Request::get(uri)
            .header(header::USER_AGENT, "dispatch-proxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.id, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(backend = %backend.id, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.id, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.id, "Health check failed: timeout");
                false
            }
        }
    }
}
