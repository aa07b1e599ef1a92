//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (enforce connect/attempt/pool-wait deadlines)
//!     → On failure: retries.rs (check if retryable, pick another backend)
//!     → backoff.rs (optional delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend attempt has a deadline
//! - Retries never go back to a backend that already failed this request
//! - Health marking is done by the passive checker, not here

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::AttemptTimeouts;
