//! Round-robin load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer, NoAvailableBackend, Selection};

/// Round-robin selector.
/// `selected = healthy[cursor mod N]`, next cursor `(cursor + 1) mod N`.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(
        &self,
        healthy: &[Arc<Backend>],
        cursor: usize,
    ) -> Result<Selection, NoAvailableBackend> {
        let len = healthy.len();
        if len == 0 {
            return Err(NoAvailableBackend);
        }

        let index = cursor % len;
        Ok(Selection {
            backend: healthy[index].clone(),
            cursor: (index + 1) % len,
        })
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(n: u16) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| Arc::new(Backend::parse(&format!("http://127.0.0.1:{}", 8080 + i)).unwrap()))
            .collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = backends(2);

        let s1 = lb.next_server(&backends, 0).unwrap();
        assert_eq!(s1.backend.id, backends[0].id);

        let s2 = lb.next_server(&backends, s1.cursor).unwrap();
        assert_eq!(s2.backend.id, backends[1].id);

        let s3 = lb.next_server(&backends, s2.cursor).unwrap();
        assert_eq!(s3.backend.id, backends[0].id);
        assert_eq!(s3.cursor, 1);
    }

    #[test]
    fn stale_cursor_wraps_after_shrink() {
        let lb = RoundRobin::new();
        let backends = backends(2);

        // Cursor left over from a set of five.
        let s = lb.next_server(&backends, 4).unwrap();
        assert_eq!(s.backend.id, backends[0].id);
        assert_eq!(s.cursor, 1);

        let s = lb.next_server(&backends, usize::MAX).unwrap();
        assert!(s.cursor < backends.len());
    }

    #[test]
    fn empty_set_has_no_backend() {
        assert_eq!(
            RoundRobin::new().next_server(&[], 0).unwrap_err(),
            NoAvailableBackend
        );
    }
}
