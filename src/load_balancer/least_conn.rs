//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer, NoAvailableBackend, Selection};

/// Least connections selector.
/// Selects the backend with the minimum number of active pool slots.
/// Ties are scanned starting at the cursor so equal load still rotates.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(
        &self,
        healthy: &[Arc<Backend>],
        cursor: usize,
    ) -> Result<Selection, NoAvailableBackend> {
        let len = healthy.len();
        if len == 0 {
            return Err(NoAvailableBackend);
        }

        let start = cursor % len;
        let index = (0..len)
            .map(|i| (start + i) % len)
            .min_by_key(|&i| healthy[i].active_connections())
            .unwrap_or(start);

        Ok(Selection {
            backend: healthy[index].clone(),
            cursor: (index + 1) % len,
        })
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = Arc::new(Backend::parse("http://127.0.0.1:8080").unwrap());
        let b2 = Arc::new(Backend::parse("http://127.0.0.1:8081").unwrap());

        // artificially hold a slot on b1
        let _g1 = b1.try_acquire().unwrap();

        let backends = vec![b1.clone(), b2.clone()];

        // Should pick b2 (0 connections)
        let s1 = lb.next_server(&backends, 0).unwrap();
        assert_eq!(s1.backend.id, b2.id);

        // now b2 has 2, b1 has 1
        let _g2 = b2.try_acquire().unwrap();
        let _g3 = b2.try_acquire().unwrap();

        let s2 = lb.next_server(&backends, s1.cursor).unwrap();
        assert_eq!(s2.backend.id, b1.id);
    }

    #[test]
    fn ties_rotate_with_cursor() {
        let lb = LeastConnections::new();
        let backends = vec![
            Arc::new(Backend::parse("http://127.0.0.1:8080").unwrap()),
            Arc::new(Backend::parse("http://127.0.0.1:8081").unwrap()),
        ];

        let s1 = lb.next_server(&backends, 0).unwrap();
        let s2 = lb.next_server(&backends, s1.cursor).unwrap();
        assert_ne!(s1.backend.id, s2.backend.id);
    }
}
