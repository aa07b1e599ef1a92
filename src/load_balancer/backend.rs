//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint with a validated identity
//! - Bound concurrent connections with a waiter queue (per-endpoint pool)
//! - Track health state, failure streaks and the last failure time
//! - Count requests and failures for the admin API

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::http::uri::{Authority, Scheme};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::config::BackendConfig;
use crate::health::state::HealthState;

/// Why an endpoint URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("not a valid URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("path, query or fragment not allowed, expected scheme://host:port")]
    HasPath,
    #[error("not a valid authority")]
    InvalidAuthority,
}

/// Parse and validate a `scheme://host:port` endpoint URL.
pub fn parse_endpoint(raw: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(EndpointError::MissingHost);
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(EndpointError::HasPath);
    }
    Ok(url)
}

/// Stable identity of an endpoint: `scheme://host:port` with the port made explicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(Arc<str>);

impl BackendId {
    pub fn from_url(url: &Url) -> Self {
        let host = match url.host() {
            Some(url::Host::Ipv6(addr)) => format!("[{}]", addr),
            Some(host) => host.to_string(),
            None => String::new(),
        };
        let port = url.port_or_known_default().unwrap_or(80);
        Self(format!("{}://{}:{}", url.scheme(), host, port).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The endpoint's pool is full and its waiter queue is full too (or the wait timed out).
#[derive(Debug, Clone, Error)]
#[error("backend {backend} is saturated")]
pub struct BackendSaturated {
    pub backend: BackendId,
}

/// Milliseconds since process start, never zero. Zero marks "no failure yet".
pub(crate) fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64 + 1
}

/// A single backend endpoint.
#[derive(Debug)]
pub struct Backend {
    /// Identity, parsed once at construction.
    pub id: BackendId,
    /// Validated base URL.
    pub url: Url,
    /// Pre-computed URI parts for request rewriting.
    pub scheme: Scheme,
    pub authority: Authority,
    /// Weight for weighted round-robin.
    pub weight: u32,
    /// Maximum concurrent connections allowed.
    pub max_connections: usize,
    /// Maximum requests waiting for a slot.
    pub queue_depth: usize,

    slots: Arc<Semaphore>,
    queued: AtomicUsize,

    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    last_failure_ms: AtomicU64,

    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Backend {
    /// Create a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> Result<Self, EndpointError> {
        let url = parse_endpoint(&config.url)?;
        let id = BackendId::from_url(&url);
        let scheme = if url.scheme() == "https" {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        };
        let authority: Authority = id
            .as_str()
            .split_once("://")
            .map(|(_, authority)| authority)
            .unwrap_or_default()
            .parse()
            .map_err(|_| EndpointError::InvalidAuthority)?;

        let max_connections = config.max_connections.max(1);
        Ok(Self {
            id,
            url,
            scheme,
            authority,
            weight: config.weight.max(1),
            max_connections,
            queue_depth: config.queue_depth,
            slots: Arc::new(Semaphore::new(max_connections)),
            queued: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            last_failure_ms: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        })
    }

    /// Shorthand used by tests and the CLI: default limits.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        Self::from_config(&BackendConfig::new(url))
    }

    // --- Pool ---

    /// Number of pool slots currently held.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    /// Number of requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Take a slot without waiting.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BackendConnectionGuard> {
        let permit = self.slots.clone().try_acquire_owned().ok()?;
        Some(BackendConnectionGuard {
            backend: self.clone(),
            _permit: permit,
        })
    }

    /// Take a slot, waiting up to `wait` in the bounded queue if the pool is full.
    pub async fn acquire(
        self: &Arc<Self>,
        wait: Duration,
    ) -> Result<BackendConnectionGuard, BackendSaturated> {
        if let Some(guard) = self.try_acquire() {
            return Ok(guard);
        }

        let saturated = || BackendSaturated {
            backend: self.id.clone(),
        };

        let mut prev = self.queued.load(Ordering::Relaxed);
        loop {
            if prev >= self.queue_depth {
                return Err(saturated());
            }
            match self.queued.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }

        let permit = tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await;
        self.queued.fetch_sub(1, Ordering::AcqRel);

        match permit {
            Ok(Ok(permit)) => Ok(BackendConnectionGuard {
                backend: self.clone(),
                _permit: permit,
            }),
            _ => Err(saturated()),
        }
    }

    // --- Health ---

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Force the Unhealthy state. Re-marking only refreshes the failure time.
    /// Returns true if this call performed the transition.
    pub fn mark_unhealthy(&self) -> bool {
        self.touch_failure();
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.state
            .swap(HealthState::Unhealthy as u8, Ordering::AcqRel)
            != HealthState::Unhealthy as u8
    }

    /// Force the Healthy state and clear the failure streak.
    /// Returns true if this call performed the transition.
    pub fn mark_healthy(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.state
            .swap(HealthState::Healthy as u8, Ordering::AcqRel)
            != HealthState::Healthy as u8
    }

    /// Move Unhealthy → Healthy if the last failure is older than `cooldown`.
    pub fn try_recover(&self, cooldown: Duration) -> bool {
        if self.state() != HealthState::Unhealthy {
            return false;
        }
        let since = now_millis().saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
        if since < cooldown.as_millis() as u64 {
            return false;
        }
        let recovered = self
            .state
            .compare_exchange(
                HealthState::Unhealthy as u8,
                HealthState::Healthy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if recovered {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
        recovered
    }

    /// Count a failed proxied request. Returns the length of the current failure streak.
    pub fn record_failure(&self) -> usize {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.extend_failure_streak()
    }

    /// Count a failed health probe. Only the streak moves; request counters do not.
    pub fn record_probe_failure(&self) -> usize {
        self.extend_failure_streak()
    }

    fn extend_failure_streak(&self) -> usize {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.touch_failure();
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count a success. Returns the length of the current success streak.
    pub fn record_success(&self) -> usize {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Time since the last recorded failure, if any.
    pub fn since_last_failure(&self) -> Option<Duration> {
        match self.last_failure_ms.load(Ordering::Acquire) {
            0 => None,
            at => Some(Duration::from_millis(now_millis().saturating_sub(at))),
        }
    }

    fn touch_failure(&self) {
        self.last_failure_ms.fetch_max(now_millis(), Ordering::AcqRel);
    }

    // --- Counters ---

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }
}

/// A RAII guard holding one of the backend's pool slots.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
    _permit: OwnedSemaphorePermit,
}

impl BackendConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}
