//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, access spans)
//!     → dispatcher.rs (select backend, retry, health feedback)
//!     → request.rs (capture request, decide on body replay)
//!     → forward.rs (pool slot, rewrite, send, stream response)
//!     → response.rs (map failures to status codes)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::Dispatcher;
pub use forward::{ProxyEngine, ProxyError};
pub use request::{MakeRequestUuidV4, ProxyRequest, RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
