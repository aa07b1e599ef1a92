//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map dispatcher errors to client-facing status codes
//! - Keep error bodies short plain text
//!
//! # Design Decisions
//! - Backend timeouts result in 504 Gateway Timeout
//! - Backend 5xx responses never pass through here; they are relayed unchanged

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::forward::ProxyError;
use crate::load_balancer::NoAvailableBackend;

/// Status code the client sees for a failed request.
pub fn status_for(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::BackendSaturated(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProxyError::ConnectFailed(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ProxyError::BackendError(status) => *status,
        ProxyError::ClientDisconnected => StatusCode::BAD_REQUEST,
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    let mut response = (status, message).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::BackendSaturated(_) => "Backend saturated",
            ProxyError::ConnectFailed(_) => "Backend unreachable",
            ProxyError::Upstream(_) => "Upstream request failed",
            ProxyError::Timeout(_) => "Backend timed out",
            ProxyError::BackendError(_) => "Backend error",
            ProxyError::ClientDisconnected => "Request body aborted",
        };
        plain(status_for(&self), message)
    }
}

impl IntoResponse for NoAvailableBackend {
    fn into_response(self) -> Response {
        plain(StatusCode::SERVICE_UNAVAILABLE, "No healthy backends")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn errors_map_to_gateway_statuses() {
        assert_eq!(
            ProxyError::ConnectFailed("refused".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Timeout(Duration::from_secs(1)).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::BackendSaturated("b".into()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            NoAvailableBackend.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
