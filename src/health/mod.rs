//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend
//!     → Registry applies thresholds
//!
//! Passive health checks (passive.rs):
//!     Attempt outcome observed by the dispatcher
//!     → Increment failure count
//!     → Registry marks unhealthy once the threshold is reached
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     Recovery by probe, by success, or by cool-down timer
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Health state is per-backend and lives on the backend itself

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use passive::PassiveHealth;
pub use state::{HealthPolicy, HealthState};
