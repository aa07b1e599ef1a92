//! Timeout enforcement.
//!
//! # Responsibilities
//! - Hold the per-attempt deadlines (connect, response head, pool wait, body read idle)
//! - Wrap backend calls with a deadline that maps to `ProxyError::Timeout`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; dropping the future cancels the call
//! - The attempt deadline stops at the response head so long bodies can stream;
//!   after that only the gap between body chunks is bounded

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::http::forward::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    pub connect: Duration,
    pub attempt: Duration,
    pub queue: Duration,
    pub read_idle: Duration,
}

impl From<&TimeoutConfig> for AttemptTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_ms),
            attempt: Duration::from_secs(config.attempt_secs),
            queue: Duration::from_millis(config.queue_ms),
            read_idle: Duration::from_millis(config.read_idle_ms),
        }
    }
}

/// Run `fut` with a deadline.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Timeout(limit)),
    }
}
