//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Capture the inbound request as a per-request descriptor
//! - Decide whether the body can be replayed on a retry
//! - Remember whether the client broke off a streamed upload
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Only bodies of known, small size are buffered; everything else streams

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes, HttpBody};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, Uri};
use hyper::body::{Frame, SizeHint};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::forward::ProxyError;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Extension trait for reading the request ID set by the request-id layer.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// Request body that may or may not survive a failed attempt.
#[derive(Debug)]
enum ReplayableBody {
    /// Fully read; cloned for every attempt.
    Buffered(Bytes),
    /// Streamed through; gone once handed to a backend.
    Streaming(Option<Body>),
}

/// Streamed request body that flags a read error from the client side.
struct ClientBody {
    inner: Body,
    aborted: Arc<AtomicBool>,
}

impl HttpBody for ClientBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Err(_))) = &polled {
            this.aborted.store(true, Ordering::Release);
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// The inbound request as seen by the dispatcher.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: SocketAddr,
    pub request_id: String,
    body: ReplayableBody,
    body_aborted: Arc<AtomicBool>,
}

impl ProxyRequest {
    /// Capture an inbound request.
    ///
    /// The body is buffered only when its exact length is known and at most
    /// `replay_limit` bytes. A client that disconnects while that body is
    /// read yields `ClientDisconnected`.
    pub async fn from_request(
        request: Request<Body>,
        client_addr: SocketAddr,
        replay_limit: usize,
    ) -> Result<Self, ProxyError> {
        let request_id = request.request_id().to_string();
        let (parts, body) = request.into_parts();

        let exact = body.size_hint().exact();
        let body = match exact {
            Some(len) if len <= replay_limit as u64 => {
                let bytes = axum::body::to_bytes(body, replay_limit)
                    .await
                    .map_err(|err| {
                        tracing::debug!(request_id = %request_id, error = %err, "Failed to read request body");
                        ProxyError::ClientDisconnected
                    })?;
                ReplayableBody::Buffered(bytes)
            }
            _ => ReplayableBody::Streaming(Some(body)),
        };

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            client_addr,
            request_id,
            body,
            body_aborted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether the body is still available for another attempt.
    pub fn is_replayable(&self) -> bool {
        match &self.body {
            ReplayableBody::Buffered(_) => true,
            ReplayableBody::Streaming(body) => body.is_some(),
        }
    }

    /// Body for the next attempt. `None` once a streamed body was used.
    pub(crate) fn take_body(&mut self) -> Option<Body> {
        match &mut self.body {
            ReplayableBody::Buffered(bytes) => Some(Body::from(bytes.clone())),
            ReplayableBody::Streaming(body) => body.take().map(|inner| {
                Body::new(ClientBody {
                    inner,
                    aborted: self.body_aborted.clone(),
                })
            }),
        }
    }

    /// Whether the client failed while its streamed body was being forwarded.
    pub fn body_aborted(&self) -> bool {
        self.body_aborted.load(Ordering::Acquire)
    }

    /// The host the client addressed.
    pub fn original_host(&self) -> Option<HeaderValue> {
        if let Some(host) = self.headers.get(header::HOST) {
            return Some(host.clone());
        }
        self.uri
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    }

    #[cfg(test)]
    pub(crate) fn for_test(request: Request<Body>, client_addr: SocketAddr) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            client_addr,
            request_id: "test".to_string(),
            body: ReplayableBody::Streaming(Some(body)),
            body_aborted: Arc::new(AtomicBool::new(false)),
        }
    }
}
