//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried on another backend
//! - Bound retries per request
//! - Space attempts with exponential backoff + jitter
//!
//! # Design Decisions
//! - Connect failures and saturation are always retryable (nothing reached the backend)
//! - Timeouts are retried like connect failures unless configured to spare
//!   non-idempotent methods, which a backend may already have processed
//! - Streamed bodies that were handed to a backend cannot be replayed

use std::time::Duration;

use axum::http::Method;

use crate::config::RetryConfig;
use crate::http::forward::ProxyError;
use crate::resilience::backoff::Backoff;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_non_idempotent_timeouts: bool,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_non_idempotent_timeouts: config.retry_non_idempotent_timeouts,
            backoff: Backoff::from(config),
        }
    }

    /// Whether another attempt should be made after `retries_done` retries.
    pub fn should_retry(
        &self,
        err: &ProxyError,
        method: &Method,
        retries_done: u32,
        replayable: bool,
    ) -> bool {
        retries_done < self.max_retries && replayable && self.is_retryable(err, method)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }

    /// Whether an attempt error may be retried for this method.
    pub fn is_retryable(&self, err: &ProxyError, method: &Method) -> bool {
        match err {
            ProxyError::ConnectFailed(_) | ProxyError::BackendSaturated(_) => true,
            ProxyError::Timeout(_) => self.retry_non_idempotent_timeouts || method.is_idempotent(),
            ProxyError::Upstream(_)
            | ProxyError::BackendError(_)
            | ProxyError::ClientDisconnected => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_retries,
            ..Default::default()
        })
    }

    #[test]
    fn connect_failures_retry_within_budget() {
        let err = ProxyError::ConnectFailed("refused".into());
        let policy = policy(1);
        assert!(policy.should_retry(&err, &Method::POST, 0, true));
        assert!(!policy.should_retry(&err, &Method::POST, 1, true));
    }

    #[test]
    fn timeouts_retry_for_every_method_by_default() {
        let err = ProxyError::Timeout(Duration::from_secs(1));
        let policy = policy(1);
        assert!(policy.is_retryable(&err, &Method::GET));
        assert!(policy.is_retryable(&err, &Method::POST));
    }

    #[test]
    fn timeouts_can_be_limited_to_idempotent_methods() {
        let err = ProxyError::Timeout(Duration::from_secs(1));
        let policy = RetryPolicy::new(&RetryConfig {
            retry_non_idempotent_timeouts: false,
            ..Default::default()
        });
        assert!(policy.is_retryable(&err, &Method::GET));
        assert!(policy.is_retryable(&err, &Method::PUT));
        assert!(!policy.is_retryable(&err, &Method::POST));
    }

    #[test]
    fn consumed_bodies_are_not_retried() {
        let err = ProxyError::ConnectFailed("refused".into());
        assert!(!policy(3).should_retry(&err, &Method::GET, 0, false));
    }

    #[test]
    fn upstream_errors_are_final() {
        let policy = policy(3);
        assert!(!policy.is_retryable(&ProxyError::Upstream("reset".into()), &Method::GET));
        assert!(!policy.is_retryable(&ProxyError::ClientDisconnected, &Method::GET));
    }
}
