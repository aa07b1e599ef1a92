//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Serve on the bound listener until shutdown
//! - Apply backend list updates from the config watcher
//! - Run the active health monitor when enabled

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ConfigError, ProxyConfig};
use crate::health::HealthMonitor;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::MakeRequestUuidV4;
use crate::load_balancer::BackendRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP front of the dispatcher.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let dispatcher = Arc::new(Dispatcher::from_config(&config)?);
        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Create a server around an existing dispatcher (shared with the admin API).
    pub fn with_dispatcher(config: ProxyConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let state = AppState {
            dispatcher: dispatcher.clone(),
        };
        Self {
            router: Self::build_router(state),
            config,
            dispatcher,
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.dispatcher.registry()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    ///
    /// New configurations received on `config_updates` replace the backend
    /// list; an invalid one is logged and the current list kept.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.registry().all().len(),
            balancer = self.dispatcher.balancer_name(),
            "HTTP server starting"
        );

        if self.config.health_check.active_enabled {
            let monitor = HealthMonitor::new(
                self.registry().clone(),
                self.config.health_check.clone(),
                self.dispatcher.engine().client().clone(),
            );
            let monitor_shutdown = shutdown.resubscribe();
            tokio::spawn(monitor.run(monitor_shutdown));
        }

        let dispatcher = self.dispatcher.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => {
                        let Some(config) = update else { break };
                        match dispatcher.reconfigure(&config.backends) {
                            Ok(()) => tracing::info!(
                                backends = config.backends.len(),
                                "Applied backend list from reloaded configuration"
                            ),
                            Err(e) => tracing::error!(
                                error = %e,
                                "Rejected reloaded backend list, keeping current one"
                            ),
                        }
                    }
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: every method and path goes to the dispatcher.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    state.dispatcher.dispatch(request, client_addr).await
}
