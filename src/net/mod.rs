//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → listener.rs (bind the configured address)
//!     → Hand off to the HTTP layer (axum accept loop)
//!
//! Per request:
//!     → connection.rs (in-flight tracking, disconnect detection)
//! ```
//!
//! # Design Decisions
//! - A bind failure is fatal at startup
//! - Each in-flight request is tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{InFlightGuard, InFlightTracker};
pub use listener::{bind, ListenerError};
