use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::observability::StatsSnapshot;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub backends: usize,
    pub healthy_backends: usize,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub weight: u32,
    pub health: &'static str,
    pub active_connections: usize,
    pub queued: usize,
    pub max_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: usize,
    pub ms_since_last_failure: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DispatchStats {
    pub balancer: &'static str,
    pub cursor: usize,
    pub in_flight: usize,
    #[serde(flatten)]
    pub requests: StatsSnapshot,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let all = state.dispatcher.registry().all();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        backends: all.len(),
        healthy_backends: all.iter().filter(|b| b.is_healthy()).count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .dispatcher
        .registry()
        .all()
        .iter()
        .map(|b| BackendStatus {
            id: b.id.to_string(),
            weight: b.weight,
            health: b.state().as_str(),
            active_connections: b.active_connections(),
            queued: b.queued(),
            max_connections: b.max_connections,
            total_requests: b.total_requests(),
            failed_requests: b.failed_requests(),
            consecutive_failures: b.consecutive_failures(),
            ms_since_last_failure: b.since_last_failure().map(|d| d.as_millis() as u64),
        })
        .collect();

    Json(statuses)
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<DispatchStats> {
    let dispatcher = &state.dispatcher;
    Json(DispatchStats {
        balancer: dispatcher.balancer_name(),
        cursor: dispatcher.registry().cursor(),
        in_flight: dispatcher.in_flight().count(),
        requests: dispatcher.stats().snapshot(),
    })
}
