//! Forwarding a single attempt to a backend.
//!
//! # Responsibilities
//! - Hold the shared upstream client (HTTP/1.1, http and https backends)
//! - Take a pool slot on the chosen backend, bounded by its waiter queue
//! - Rewrite the request target and forwarding headers
//! - Classify failures so the dispatcher can decide on retries
//! - Relay the response body as a stream, holding the pool slot until it ends
//! - Report what happens to the body after the head (stall, break, abandonment)
//!
//! # Design Decisions
//! - The attempt deadline covers connect through response head; after that the
//!   gap between body chunks is bounded by the read-idle deadline
//! - A request body the client broke off is the client's failure, never the backend's
//! - The response body is never buffered; hyper's backpressure reaches the backend
//! - Dropping the response body early drops the backend connection with it

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes, HttpBody};
use axum::BoxError;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Response, StatusCode, Uri, Version};
use hyper::body::{Frame, SizeHint};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use rustls_native_certs::load_native_certs;
use thiserror::Error;
use tokio::time::{Instant, Sleep};

use crate::config::TimeoutConfig;
use crate::health::PassiveHealth;
use crate::http::request::{ProxyRequest, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO};
use crate::load_balancer::{Backend, BackendConnectionGuard, BackendRegistry, BackendSaturated};
use crate::observability::{metrics, RequestStats};
use crate::resilience::timeouts::{with_deadline, AttemptTimeouts};

/// Pooled client shared by every backend.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Why a forwarding attempt did not produce a response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The TCP (or TLS) connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The attempt did not produce a response head in time.
    #[error("backend attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The backend's pool and waiter queue are both full.
    #[error("backend {0} is saturated")]
    BackendSaturated(String),

    /// The exchange broke after the connection was up.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The backend answered with a 5xx. Relayed to the client as-is.
    #[error("backend returned {0}")]
    BackendError(StatusCode),

    /// The client went away before the request could be forwarded.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl ProxyError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ConnectFailed(_) => "connect_failed",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::BackendSaturated(_) => "saturated",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::BackendError(_) => "backend_error",
            ProxyError::ClientDisconnected => "client_disconnected",
        }
    }
}

impl From<BackendSaturated> for ProxyError {
    fn from(err: BackendSaturated) -> Self {
        ProxyError::BackendSaturated(err.backend.to_string())
    }
}

/// Build the shared upstream client.
pub fn build_client(config: &TimeoutConfig) -> UpstreamClient {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_connect_timeout(Some(Duration::from_millis(config.connect_ms)));
    http_connector.set_nodelay(true);

    let mut roots = rustls::RootCertStore::empty();
    let native_certs = load_native_certs();
    for cert in native_certs.certs {
        if roots.add(cert).is_err() {
            tracing::warn!("Failed to add native certificate to root store");
        }
    }
    if !native_certs.errors.is_empty() {
        tracing::warn!(errors = ?native_certs.errors, "Some native certificates failed to load");
    }
    tracing::debug!(roots = roots.len(), "Loaded native root certificates");

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .build(https_connector)
}

/// Where a relayed response body reports how it ended.
#[derive(Clone)]
pub struct BodyWatch {
    registry: Arc<BackendRegistry>,
    passive: PassiveHealth,
    stats: Arc<RequestStats>,
}

impl BodyWatch {
    pub fn new(
        registry: Arc<BackendRegistry>,
        passive: PassiveHealth,
        stats: Arc<RequestStats>,
    ) -> Self {
        Self {
            registry,
            passive,
            stats,
        }
    }

    fn stalled(&self, backend: &Backend, idle: Duration) {
        tracing::warn!(
            backend = %backend.id,
            idle = ?idle,
            "Backend stalled mid-body, aborting response"
        );
        self.passive
            .observe_error(&self.registry, backend, &ProxyError::Timeout(idle));
    }

    fn broken(&self, backend: &Backend, err: &BoxError) {
        tracing::warn!(backend = %backend.id, error = %err, "Backend response body failed");
        self.passive
            .observe_error(&self.registry, backend, &ProxyError::Upstream(err.to_string()));
    }

    fn abandoned(&self, backend: &Backend) {
        tracing::debug!(
            backend = %backend.id,
            "Client went away before the response body finished"
        );
        metrics::record_client_disconnect();
        self.stats.record_client_disconnect();
    }
}

/// Forwards requests to backends.
#[derive(Clone)]
pub struct ProxyEngine {
    client: UpstreamClient,
    timeouts: AttemptTimeouts,
    watch: BodyWatch,
}

impl ProxyEngine {
    pub fn new(config: &TimeoutConfig, watch: BodyWatch) -> Self {
        Self {
            client: build_client(config),
            timeouts: AttemptTimeouts::from(config),
            watch,
        }
    }

    /// The shared client, also used by the active health probe.
    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    /// Forward one attempt of `request` to `backend`.
    ///
    /// The request body is only taken once a pool slot is held, so a
    /// saturated backend leaves a streaming body available for another one.
    pub async fn forward(
        &self,
        backend: &Arc<Backend>,
        request: &mut ProxyRequest,
    ) -> Result<Response<Body>, ProxyError> {
        let slot = backend.acquire(self.timeouts.queue).await.map_err(|err| {
            metrics::record_saturated(backend.id.as_str());
            ProxyError::from(err)
        })?;

        let body = request
            .take_body()
            .ok_or_else(|| ProxyError::Upstream("request body already consumed".into()))?;
        let outbound = build_outbound(backend, request, body)?;

        backend.record_request();
        tracing::debug!(
            request_id = %request.request_id,
            backend = %backend.id,
            method = %request.method,
            uri = %outbound.uri(),
            "Forwarding request"
        );

        let connect_timeout = self.timeouts.connect;
        let sent = with_deadline(self.timeouts.attempt, async {
            self.client
                .request(outbound)
                .await
                .map_err(|err| classify(err, connect_timeout))
        })
        .await;
        let response = match sent {
            Ok(response) => response,
            Err(_) if request.body_aborted() => return Err(ProxyError::ClientDisconnected),
            Err(err) => return Err(err),
        };

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = Body::new(GuardedBody::new(
            incoming,
            slot,
            self.watch.clone(),
            self.timeouts.read_idle,
        ));
        Ok(Response::from_parts(parts, body))
    }
}

fn build_outbound(
    backend: &Backend,
    request: &ProxyRequest,
    body: Body,
) -> Result<Request<Body>, ProxyError> {
    let path_and_query = request
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let uri = Uri::builder()
        .scheme(backend.scheme.clone())
        .authority(backend.authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|err| ProxyError::Upstream(format!("invalid upstream uri: {}", err)))?;

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    set_forwarding_headers(&mut headers, backend, request)?;

    let mut outbound = Request::new(body);
    *outbound.method_mut() = request.method.clone();
    *outbound.uri_mut() = uri;
    *outbound.version_mut() = Version::HTTP_11;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

fn set_forwarding_headers(
    headers: &mut HeaderMap,
    backend: &Backend,
    request: &ProxyRequest,
) -> Result<(), ProxyError> {
    let invalid = |err: header::InvalidHeaderValue| {
        ProxyError::Upstream(format!("invalid forwarding header: {}", err))
    };

    let client_ip = request.client_addr.ip().to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client_ip),
        _ => client_ip,
    };
    headers.insert(
        X_FORWARDED_FOR,
        HeaderValue::from_str(&forwarded_for).map_err(invalid)?,
    );

    if let Some(host) = request.original_host() {
        headers.entry(X_FORWARDED_HOST).or_insert(host);
    }
    headers
        .entry(X_FORWARDED_PROTO)
        .or_insert(HeaderValue::from_static("http"));

    headers.insert(
        header::HOST,
        HeaderValue::from_str(backend.authority.as_str()).map_err(invalid)?,
    );
    Ok(())
}

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

fn classify(err: hyper_util::client::legacy::Error, connect_timeout: Duration) -> ProxyError {
    if caused_by_request_body(&err) {
        return ProxyError::ClientDisconnected;
    }
    let detail = error_chain(&err);
    if err.is_connect() {
        if caused_by_timeout(&err) {
            return ProxyError::Timeout(connect_timeout);
        }
        return ProxyError::ConnectFailed(detail);
    }
    ProxyError::Upstream(detail)
}

fn caused_by_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = current.source();
    }
    false
}

/// Whether the failure came from reading the inbound request body.
fn caused_by_request_body(err: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if current.is::<axum::Error>() {
            return true;
        }
        if let Some(hyper_err) = current.downcast_ref::<hyper::Error>() {
            if hyper_err.is_user() {
                return true;
            }
        }
        source = current.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Response body that owns the backend pool slot.
///
/// The slot is released when the body reports its end or an error. A gap
/// of `idle` between frames ends the body with a timeout. If the body is
/// dropped before its end, the client went away mid-response.
struct GuardedBody<B: HttpBody> {
    inner: B,
    slot: Option<BackendConnectionGuard>,
    watch: BodyWatch,
    idle: Duration,
    idle_deadline: Pin<Box<Sleep>>,
}

impl<B: HttpBody> GuardedBody<B> {
    fn new(inner: B, slot: BackendConnectionGuard, watch: BodyWatch, idle: Duration) -> Self {
        Self {
            inner,
            slot: Some(slot),
            watch,
            idle,
            idle_deadline: Box::pin(tokio::time::sleep(idle)),
        }
    }
}

impl<B> HttpBody for GuardedBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                this.idle_deadline.as_mut().reset(Instant::now() + this.idle);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                this.slot.take();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                let err: BoxError = err.into();
                if let Some(slot) = this.slot.take() {
                    this.watch.broken(&slot, &err);
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => {
                if this.slot.is_none() || this.idle_deadline.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                if let Some(slot) = this.slot.take() {
                    this.watch.stalled(&slot, this.idle);
                }
                Poll::Ready(Some(Err(ProxyError::Timeout(this.idle).into())))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: HttpBody> Drop for GuardedBody<B> {
    fn drop(&mut self) {
        // Bodiless responses (HEAD, 204, 304) may be dropped unpolled.
        if self.inner.is_end_stream() {
            return;
        }
        if let Some(slot) = self.slot.take() {
            self.watch.abandoned(&slot);
        }
    }
}
