//! Backend registry.
//!
//! # Responsibilities
//! - Own the ordered endpoint list and the selection cursor
//! - Serve healthy snapshots (with cool-down recovery and fail-open)
//! - Apply health transitions and log them
//! - Replace the endpoint list atomically on reconfiguration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::{BackendConfig, ConfigError};
use crate::health::state::HealthPolicy;
use crate::load_balancer::{
    backend::{Backend, BackendId},
    LoadBalancer, NoAvailableBackend,
};
use crate::observability::metrics;

/// Ordered set of backends plus the shared round-robin cursor.
///
/// Readers load an `Arc` snapshot and never block. Writers (register,
/// remove, reconfigure) serialize on a mutex and publish a whole new list.
#[derive(Debug)]
pub struct BackendRegistry {
    endpoints: ArcSwap<Vec<Arc<Backend>>>,
    cursor: AtomicUsize,
    policy: HealthPolicy,
    write_lock: Mutex<()>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
            policy,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a registry from configuration, in configuration order.
    pub fn from_config(
        configs: &[BackendConfig],
        policy: HealthPolicy,
    ) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        let registry = Self::new(policy);
        for config in configs {
            registry.register(build(config)?)?;
        }
        Ok(registry)
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Append an endpoint. Fails on a duplicate identity.
    pub fn register(&self, backend: Backend) -> Result<Arc<Backend>, ConfigError> {
        let _guard = self.lock_writers();
        let current = self.endpoints.load_full();
        if current.iter().any(|b| b.id == backend.id) {
            return Err(ConfigError::DuplicateBackend(backend.id.to_string()));
        }

        let backend = Arc::new(backend);
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(backend.clone());
        self.endpoints.store(Arc::new(next));

        tracing::info!(backend = %backend.id, "Backend registered");
        Ok(backend)
    }

    /// Remove an endpoint by identity. In-flight requests keep their `Arc`.
    pub fn remove(&self, id: &BackendId) -> bool {
        let _guard = self.lock_writers();
        let current = self.endpoints.load_full();
        if !current.iter().any(|b| &b.id == id) {
            return false;
        }
        let next: Vec<_> = current.iter().filter(|b| &b.id != id).cloned().collect();
        self.endpoints.store(Arc::new(next));
        tracing::info!(backend = %id, "Backend removed");
        true
    }

    /// Replace the whole endpoint list in one step.
    ///
    /// Endpoints whose identity is unchanged keep their state (health,
    /// counters, pool). Nothing is published if any entry is invalid.
    pub fn reconfigure(&self, configs: &[BackendConfig]) -> Result<(), ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let _guard = self.lock_writers();
        let current = self.endpoints.load_full();
        let mut next: Vec<Arc<Backend>> = Vec::with_capacity(configs.len());

        for config in configs {
            let fresh = build(config)?;
            if next.iter().any(|b| b.id == fresh.id) {
                return Err(ConfigError::DuplicateBackend(fresh.id.to_string()));
            }
            let reused = current.iter().find(|b| {
                b.id == fresh.id
                    && b.weight == fresh.weight
                    && b.max_connections == fresh.max_connections
                    && b.queue_depth == fresh.queue_depth
            });
            next.push(match reused {
                Some(existing) => existing.clone(),
                None => Arc::new(fresh),
            });
        }

        tracing::info!(
            before = current.len(),
            after = next.len(),
            "Backend list replaced"
        );
        self.endpoints.store(Arc::new(next));
        Ok(())
    }

    /// Snapshot of every registered endpoint in registration order.
    pub fn all(&self) -> Arc<Vec<Arc<Backend>>> {
        self.endpoints.load_full()
    }

    pub fn get(&self, id: &BackendId) -> Option<Arc<Backend>> {
        self.endpoints.load().iter().find(|b| &b.id == id).cloned()
    }

    /// Endpoints eligible for selection, in registration order.
    ///
    /// Unhealthy endpoints whose cool-down has elapsed are recovered here.
    /// If nothing is healthy and fail-open is enabled, every endpoint is returned.
    pub fn healthy_set(&self) -> Vec<Arc<Backend>> {
        let snapshot = self.endpoints.load();

        if let Some(cooldown) = self.policy.cooldown {
            for backend in snapshot.iter() {
                if backend.try_recover(cooldown) {
                    tracing::info!(backend = %backend.id, "Backend back in rotation after cool-down");
                    metrics::record_backend_health(backend.id.as_str(), true);
                }
            }
        }

        let healthy: Vec<_> = snapshot.iter().filter(|b| b.is_healthy()).cloned().collect();
        if healthy.is_empty() && self.policy.fail_open {
            return snapshot.iter().cloned().collect();
        }
        healthy
    }

    /// Select a backend with `balancer`, skipping `exclude`.
    ///
    /// The cursor advances by exactly one policy step per successful call,
    /// committed with compare-and-swap so concurrent callers never share a step.
    pub fn select(
        &self,
        balancer: &dyn LoadBalancer,
        exclude: &[BackendId],
    ) -> Result<Arc<Backend>, NoAvailableBackend> {
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            let mut candidates = self.healthy_set();
            if !exclude.is_empty() {
                candidates.retain(|b| !exclude.contains(&b.id));
            }

            let selection = balancer.next_server(&candidates, current)?;
            match self.cursor.compare_exchange_weak(
                current,
                selection.cursor,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(selection.backend),
                Err(actual) => current = actual,
            }
        }
    }

    /// Current cursor value (for the admin API).
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Mark an endpoint unhealthy. Idempotent apart from refreshing the failure time.
    pub fn mark_unhealthy(&self, backend: &Backend, reason: &str) {
        if backend.mark_unhealthy() {
            tracing::warn!(backend = %backend.id, reason, "Backend marked unhealthy");
            metrics::record_backend_health(backend.id.as_str(), false);
        }
    }

    /// Mark an endpoint healthy. Idempotent.
    pub fn mark_healthy(&self, backend: &Backend) {
        if backend.mark_healthy() {
            tracing::info!(backend = %backend.id, "Backend marked healthy");
            metrics::record_backend_health(backend.id.as_str(), true);
        }
    }

    /// Count a failed request against the threshold, marking unhealthy once reached.
    pub fn record_failure(&self, backend: &Backend, reason: &str) {
        let streak = backend.record_failure();
        self.apply_failure_streak(backend, streak, reason);
    }

    /// Count a failed health probe against the threshold.
    pub fn record_probe_failure(&self, backend: &Backend) {
        let streak = backend.record_probe_failure();
        self.apply_failure_streak(backend, streak, "health probe");
    }

    fn apply_failure_streak(&self, backend: &Backend, streak: usize, reason: &str) {
        if streak >= self.policy.unhealthy_threshold {
            self.mark_unhealthy(backend, reason);
        } else {
            tracing::debug!(
                backend = %backend.id,
                streak,
                threshold = self.policy.unhealthy_threshold,
                reason,
                "Backend failure recorded"
            );
        }
    }

    /// Count a probe success, marking healthy once `healthy_threshold` is reached.
    pub fn record_probe_success(&self, backend: &Backend) {
        let streak = backend.record_success();
        if streak >= self.policy.healthy_threshold {
            self.mark_healthy(backend);
        }
    }

    /// A proxied request succeeded: the failure streak ends and the endpoint is healthy.
    pub fn record_success(&self, backend: &Backend) {
        backend.record_success();
        self.mark_healthy(backend);
    }

    fn lock_writers(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build(config: &BackendConfig) -> Result<Backend, ConfigError> {
    Backend::from_config(config).map_err(|reason| ConfigError::InvalidBackend {
        url: config.url.clone(),
        reason,
    })
}
