//! Weighted round-robin load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer, NoAvailableBackend, Selection};

/// Weighted round-robin selector.
///
/// The cycle has `sum(weights)` slots laid out round by round: round `r`
/// contains, in registration order, every backend whose weight is greater
/// than `r`. Weights 3 and 1 give `A B A A`.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin;

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(
        &self,
        healthy: &[Arc<Backend>],
        cursor: usize,
    ) -> Result<Selection, NoAvailableBackend> {
        let total: usize = healthy.iter().map(|b| b.weight as usize).sum();
        if total == 0 {
            return Err(NoAvailableBackend);
        }

        let slot = cursor % total;
        let mut remaining = slot;
        let mut round = 0u32;
        loop {
            for backend in healthy.iter().filter(|b| b.weight > round) {
                if remaining == 0 {
                    return Ok(Selection {
                        backend: backend.clone(),
                        cursor: (slot + 1) % total,
                    });
                }
                remaining -= 1;
            }
            round += 1;
        }
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
