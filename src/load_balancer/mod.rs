//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher asks for a backend
//!     → registry.rs (healthy snapshot, fail-open, exclusions)
//!     → Apply selection policy with the shared cursor:
//!         - round_robin.rs (rotate through backends)
//!         - weighted.rs (rotate through weighted slots)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → registry.rs commits the new cursor (compare-and-swap)
//!     → backend.rs (acquire a pooled connection slot)
//! ```
//!
//! # Design Decisions
//! - Policies are pure: (healthy set, cursor) → (backend, next cursor)
//! - The registry owns the only cursor; nothing else mutates it
//! - Unhealthy backends excluded from selection unless every one is unhealthy

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::BalancerAlgorithm;

pub mod backend;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

pub use backend::{Backend, BackendConnectionGuard, BackendId, BackendSaturated};
pub use least_conn::LeastConnections;
pub use registry::BackendRegistry;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// No backend can take the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no available backend")]
pub struct NoAvailableBackend;

/// Result of one selection step.
#[derive(Debug, Clone)]
pub struct Selection {
    pub backend: Arc<Backend>,
    /// Cursor value to store for the next call.
    pub cursor: usize,
}

/// A selection policy.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick a backend from `healthy` given the current cursor.
    ///
    /// Must not panic for any cursor value; the cursor is reduced modulo the
    /// policy's cycle length computed from the slice it is given.
    fn next_server(
        &self,
        healthy: &[Arc<Backend>],
        cursor: usize,
    ) -> Result<Selection, NoAvailableBackend>;

    fn name(&self) -> &'static str;
}

/// Build the configured policy.
pub fn from_algorithm(algorithm: BalancerAlgorithm) -> Box<dyn LoadBalancer> {
    match algorithm {
        BalancerAlgorithm::RoundRobin => Box::new(RoundRobin::new()),
        BalancerAlgorithm::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
        BalancerAlgorithm::LeastConnections => Box::new(LeastConnections::new()),
    }
}
