//! Admin API: read-only JSON views of the dispatcher.
//!
//! Bound to loopback by default. There is no authentication.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::handlers::*;
use crate::http::Dispatcher;

#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn setup_admin_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/stats", get(get_stats))
        .with_state(AdminState { dispatcher })
}

/// Serve the admin API until shutdown.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(dispatcher))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
