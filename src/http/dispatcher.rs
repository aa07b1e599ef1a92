//! Per-request dispatch: select, forward, retry.
//!
//! # Responsibilities
//! - Own the request lifecycle from arrival to response head
//! - Ask the registry for a backend, excluding ones that already failed
//! - Feed every attempt outcome to passive health tracking
//! - Retry retryable failures within the configured budget
//! - Map terminal failures to a well-formed client response
//!
//! # Design Decisions
//! - No lock on the request path; shared state is the registry snapshot and cursor
//! - Backend 5xx responses are relayed as-is, never retried
//! - A request the client abandons is dropped with its in-flight backend call

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;

use crate::config::{BackendConfig, ConfigError, ProxyConfig};
use crate::health::{HealthPolicy, PassiveHealth};
use crate::http::forward::{BodyWatch, ProxyEngine, ProxyError};
use crate::http::request::{ProxyRequest, RequestIdExt};
use crate::load_balancer::{self, BackendId, BackendRegistry, LoadBalancer};
use crate::net::InFlightTracker;
use crate::observability::{metrics, RequestStats};
use crate::resilience::RetryPolicy;

const NO_BACKEND: &str = "none";

/// Routes requests onto the backend registry.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    balancer: Box<dyn LoadBalancer>,
    engine: ProxyEngine,
    passive: PassiveHealth,
    retry: RetryPolicy,
    replay_limit: usize,
    stats: Arc<RequestStats>,
    in_flight: InFlightTracker,
}

impl Dispatcher {
    /// Build the registry and every per-request collaborator from configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let registry = BackendRegistry::from_config(
            &config.backends,
            HealthPolicy::from(&config.health_check),
        )?;
        Ok(Self::new(config, Arc::new(registry)))
    }

    pub fn new(config: &ProxyConfig, registry: Arc<BackendRegistry>) -> Self {
        let stats = Arc::new(RequestStats::new());
        let passive = PassiveHealth::new(&config.health_check);
        let watch = BodyWatch::new(registry.clone(), passive, stats.clone());
        Self {
            registry,
            balancer: load_balancer::from_algorithm(config.balancer.algorithm),
            engine: ProxyEngine::new(&config.timeouts, watch),
            passive,
            retry: RetryPolicy::new(&config.retries),
            replay_limit: config.retries.replay_buffer_bytes,
            in_flight: InFlightTracker::new(stats.clone()),
            stats,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn balancer_name(&self) -> &'static str {
        self.balancer.name()
    }

    pub fn engine(&self) -> &ProxyEngine {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    /// Swap in a new backend list. The current list stays if the new one is invalid.
    pub fn reconfigure(&self, backends: &[BackendConfig]) -> Result<(), ConfigError> {
        self.registry.reconfigure(backends)
    }

    /// Handle one inbound request.
    pub async fn dispatch(&self, request: Request<Body>, client_addr: SocketAddr) -> Response<Body> {
        let start = Instant::now();
        let method = request.method().clone();
        let in_flight = self.in_flight.track(request.request_id());

        let (response, backend) = self.run(request, client_addr).await;

        let status = response.status().as_u16();
        metrics::record_request(method.as_str(), status, &backend, start);
        self.stats.record_response(status);
        in_flight.complete();

        tracing::debug!(
            method = %method,
            status,
            backend = %backend,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request dispatched"
        );
        response
    }

    async fn run(&self, request: Request<Body>, client_addr: SocketAddr) -> (Response<Body>, String) {
        let mut request =
            match ProxyRequest::from_request(request, client_addr, self.replay_limit).await {
                Ok(request) => request,
                Err(err) => return (err.into_response(), NO_BACKEND.to_string()),
            };

        let mut tried: Vec<BackendId> = Vec::new();
        let mut last_error: Option<(ProxyError, BackendId)> = None;
        let mut retries = 0u32;

        loop {
            let backend = match self.registry.select(self.balancer.as_ref(), &tried) {
                Ok(backend) => backend,
                Err(no_backend) => {
                    return match last_error {
                        Some((err, failed)) => (err.into_response(), failed.to_string()),
                        None => {
                            tracing::warn!(request_id = %request.request_id, "No healthy backends");
                            metrics::record_no_backend();
                            self.stats.record_no_backend();
                            (no_backend.into_response(), NO_BACKEND.to_string())
                        }
                    };
                }
            };

            match self.engine.forward(&backend, &mut request).await {
                Ok(response) => {
                    let status = response.status();
                    self.passive.observe_response(&self.registry, &backend, status);
                    if status.is_server_error() {
                        tracing::debug!(
                            request_id = %request.request_id,
                            backend = %backend.id,
                            status = %status,
                            "Relaying backend error"
                        );
                    }
                    return (response, backend.id.to_string());
                }
                Err(ProxyError::ClientDisconnected) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        backend = %backend.id,
                        "Client aborted the request body"
                    );
                    metrics::record_client_disconnect();
                    self.stats.record_client_disconnect();
                    return (
                        ProxyError::ClientDisconnected.into_response(),
                        backend.id.to_string(),
                    );
                }
                Err(err) => {
                    self.passive.observe_error(&self.registry, &backend, &err);
                    tracing::warn!(
                        request_id = %request.request_id,
                        backend = %backend.id,
                        attempt = retries + 1,
                        error = %err,
                        "Backend attempt failed"
                    );

                    tried.push(backend.id.clone());
                    if !self.retry.should_retry(
                        &err,
                        &request.method,
                        retries,
                        request.is_replayable(),
                    ) {
                        return (err.into_response(), backend.id.to_string());
                    }

                    retries += 1;
                    metrics::record_retry(err.kind());
                    self.stats.record_retry();

                    let delay = self.retry.delay(retries);
                    tracing::info!(
                        request_id = %request.request_id,
                        attempt = retries + 1,
                        delay = ?delay,
                        reason = err.kind(),
                        "Retrying on another backend"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some((err, backend.id.clone()));
                }
            }
        }
    }
}
