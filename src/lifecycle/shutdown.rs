//! Shutdown coordination for the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::net::InFlightTracker;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Only the first call has an effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        let receivers = self.tx.receiver_count();
        let _ = self.tx.send(());
        tracing::info!(receivers, "Shutdown triggered");
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Wait for in-flight requests to finish, up to `grace`.
    pub async fn drain(&self, in_flight: &InFlightTracker, grace: Duration) -> bool {
        let pending = in_flight.count();
        if pending > 0 {
            tracing::info!(in_flight = pending, grace = ?grace, "Draining in-flight requests");
        }
        let drained = in_flight.wait_idle(grace).await;
        if !drained {
            tracing::warn!(in_flight = in_flight.count(), "Drain deadline reached with requests still in flight");
        }
        drained
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observability::RequestStats;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber_once() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();

        shutdown.trigger();
        shutdown.trigger();

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(a.try_recv().is_err());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_is_immediate() {
        let shutdown = Shutdown::new();
        let tracker = InFlightTracker::new(Arc::new(RequestStats::new()));
        assert!(shutdown.drain(&tracker, Duration::from_millis(10)).await);
    }
}
