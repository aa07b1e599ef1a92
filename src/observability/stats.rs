//! In-process request counters for the admin API.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Aggregate counters, updated lock-free on the request path.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    retries: AtomicU64,
    no_backend: AtomicU64,
    client_disconnects: AtomicU64,
    by_status: DashMap<u16, AtomicU64>,
}

/// Point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub retries: u64,
    pub no_backend: u64,
    pub client_disconnects: u64,
    /// Status code → count, sorted by status code.
    pub by_status: Vec<(u16, u64)>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_response(&self, status: u16) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.by_status
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_backend(&self) {
        self.no_backend.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_disconnect(&self) {
        self.client_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut by_status: Vec<(u16, u64)> = self
            .by_status
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        by_status.sort_unstable();

        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            no_backend: self.no_backend.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            by_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_status() {
        let stats = RequestStats::new();
        stats.record_response(200);
        stats.record_response(200);
        stats.record_response(503);
        stats.record_retry();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.by_status, vec![(200, 2), (503, 1)]);
    }
}
