//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests currently being dispatched
//! - Detect requests abandoned by their client
//! - Let shutdown wait for in-flight requests to drain

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::{metrics, RequestStats};

/// Counts requests between arrival and response head.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    count: AtomicUsize,
    idle: Notify,
    stats: Arc<RequestStats>,
}

impl InFlightTracker {
    pub fn new(stats: Arc<RequestStats>) -> Self {
        Self {
            inner: Arc::new(Inner {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
                stats,
            }),
        }
    }

    /// Record a request. The guard must be completed once a response exists.
    pub fn track(&self, request_id: &str) -> InFlightGuard {
        let count = self.inner.count.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_in_flight(count);
        InFlightGuard {
            inner: self.inner.clone(),
            request_id: request_id.to_string(),
            completed: false,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Wait until nothing is in flight or `timeout` passes.
    /// Returns true if the tracker drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Held by the dispatcher for the duration of one request.
///
/// Dropping it without [`InFlightGuard::complete`] means the handler future
/// was cancelled, which only happens when the client disconnects.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<Inner>,
    request_id: String,
    completed: bool,
}

impl InFlightGuard {
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!(request_id = %self.request_id, "Client disconnected before a response was ready");
            metrics::record_client_disconnect();
            self.inner.stats.record_client_disconnect();
        }

        let remaining = self.inner.count.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_in_flight(remaining);
        if remaining == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}
