//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from selection
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: probe successes >= healthy_threshold,
//!                      a successful proxied request,
//!                      or cool-down elapsed since the last failure
//! ```
//!
//! # Design Decisions
//! - Transitions are atomic swaps on the backend; re-marking is idempotent
//! - State changes logged for observability
//! - All-unhealthy is handled by the registry (fail-open), not here

use std::time::Duration;

use crate::config::HealthCheckConfig;

/// Health state enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            2 => HealthState::Unhealthy,
            _ => HealthState::Healthy,
        }
    }
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

/// Thresholds and recovery rules shared by passive and active checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub unhealthy_threshold: usize,
    pub healthy_threshold: usize,
    pub cooldown: Option<Duration>,
    pub fail_open: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&HealthCheckConfig::default())
    }
}

impl From<&HealthCheckConfig> for HealthPolicy {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            unhealthy_threshold: config.unhealthy_threshold.max(1) as usize,
            healthy_threshold: config.healthy_threshold.max(1) as usize,
            cooldown: config.cooldown(),
            fail_open: config.fail_open,
        }
    }
}
