//! Round-robin reverse-proxy dispatcher.
//!
//! ```text
//!     Client ──▶ http::server ──▶ http::dispatcher ──▶ load_balancer::registry
//!                                        │                  (healthy set + cursor)
//!                                        ▼
//!     Client ◀── streamed body ◀── http::forward ──▶ Backend
//! ```

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::{Dispatcher, HttpServer};
pub use lifecycle::Shutdown;
pub use load_balancer::BackendRegistry;
