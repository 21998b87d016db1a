//! Per-request proxy pipeline.
//!
//! ```text
//! Received ─▶ shutdown check ──(not serving)──▶ Rejected        503
//!                │
//!                ▼
//!             lookup ─────────(no route)──────▶ NotFound        404
//!                │
//!                ▼
//!             enrich ─────(malformed addr)────▶ Failed          500
//!                │
//!                ▼
//!             rewrite ───(unusable target)────▶ InvalidTarget   500
//!                │
//!                ▼
//!             forward ────(transport error)───▶ TransportError  502
//!                │
//!                ▼
//!             Completed (backend status, streamed body)
//! ```
//!
//! Latency is recorded once per forwarded request, when the response body
//! finishes, fails, or is dropped by a disconnecting client. A forward
//! abandoned before the backend answers is recorded when its future drops.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper::body::{Frame, SizeHint};
use url::Url;

use crate::http::headers::{enrich, EnrichError, HeaderConfig};
use crate::http::transport::{Transport, TransportError};
use crate::lifecycle::ShutdownCoordinator;
use crate::observability::{LatencyTimer, MetricsSink, NoopSink};
use crate::routing::matcher::request_host;
use crate::routing::{SharedTable, Target};

/// Header carrying the routing trace token unless configured otherwise.
pub const DEFAULT_TRACE_HEADER: &str = "trace";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Connection-level facts about an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Peer address as `ip:port`.
    pub remote_addr: String,
    /// Whether the request arrived over a TLS listener.
    pub tls: bool,
}

impl RequestContext {
    pub fn new(remote_addr: impl Into<String>, tls: bool) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            tls,
        }
    }
}

/// Terminal failure of a proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("shutting down")]
    ShuttingDown,
    #[error("no route for {host}{path}")]
    NoRouteMatch { host: String, path: String },
    #[error(transparent)]
    MalformedAddress(#[from] EnrichError),
    #[error("cannot address target {target}: {source}")]
    InvalidTarget {
        target: String,
        source: axum::http::Error,
    },
    #[error("forwarding to {target} failed: {source}")]
    TransportFailure { target: String, source: TransportError },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::NoRouteMatch { .. } => StatusCode::NOT_FOUND,
            ProxyError::MalformedAddress(_) | ProxyError::InvalidTarget { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        match self {
            ProxyError::NoRouteMatch { .. } => status.into_response(),
            ProxyError::TransportFailure { .. } => (status, "Bad Gateway").into_response(),
            other => (status, other.to_string()).into_response(),
        }
    }
}

/// Orchestrates lookup, enrichment, forwarding and timing for each request.
pub struct ProxyHandler {
    table: Arc<SharedTable>,
    shutdown: ShutdownCoordinator,
    transport: Arc<dyn Transport>,
    headers: HeaderConfig,
    trace_header: Option<HeaderName>,
    sink: Arc<dyn MetricsSink>,
    requests: Arc<LatencyTimer>,
}

impl ProxyHandler {
    pub fn new(
        table: Arc<SharedTable>,
        shutdown: ShutdownCoordinator,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            table,
            shutdown,
            transport,
            headers: HeaderConfig::default(),
            trace_header: Some(HeaderName::from_static(DEFAULT_TRACE_HEADER)),
            sink: Arc::new(NoopSink),
            requests: Arc::new(LatencyTimer::new()),
        }
    }

    pub fn with_headers(mut self, headers: HeaderConfig) -> Self {
        self.headers = headers;
        self
    }

    /// Header to read trace tokens from; `None` disables trace pinning.
    pub fn with_trace_header(mut self, header: Option<HeaderName>) -> Self {
        self.trace_header = header;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Timer covering every forwarded request.
    pub fn requests(&self) -> &LatencyTimer {
        &self.requests
    }

    /// Proxy `request`, mapping every failure to its status response.
    pub async fn handle(&self, ctx: RequestContext, request: Request<Body>) -> Response<Body> {
        match self.forward(ctx, request).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }

    /// Run the pipeline, returning the streamed backend response.
    pub async fn forward(
        &self,
        ctx: RequestContext,
        mut request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        if !self.shutdown.is_serving() {
            return Err(ProxyError::ShuttingDown);
        }

        let start = Instant::now();
        let trace = self
            .trace_header
            .as_ref()
            .and_then(|name| request.headers().get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let target = match self.table.lookup(&request, trace.as_deref()) {
            Some(target) => target,
            None => {
                let host = request_host(&request);
                let path = request.uri().path().to_string();
                tracing::warn!(host = %host, path = %path, "No route matched");
                return Err(ProxyError::NoRouteMatch { host, path });
            }
        };

        enrich(request.headers_mut(), &ctx.remote_addr, ctx.tls, &self.headers)?;

        let upstream = rewrite_request(request, target.url()).map_err(|source| {
            tracing::error!(target = %target.url(), error = %source, "Cannot rewrite request for target");
            ProxyError::InvalidTarget {
                target: target.url().to_string(),
                source,
            }
        })?;

        tracing::debug!(
            service = %target.service(),
            target = %target.url(),
            uri = %upstream.uri(),
            "Forwarding request"
        );

        let timer = ForwardTimer {
            start,
            target: Arc::clone(&target),
            requests: Arc::clone(&self.requests),
            sink: Arc::clone(&self.sink),
        };

        match self.transport.send(upstream).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                let body = Body::new(TimedBody {
                    inner: body,
                    timer: Some(timer),
                });
                Ok(Response::from_parts(parts, body))
            }
            Err(source) => {
                drop(timer);
                tracing::error!(
                    service = %target.service(),
                    target = %target.url(),
                    error = %source,
                    "Upstream error"
                );
                Err(ProxyError::TransportFailure {
                    target: target.url().to_string(),
                    source,
                })
            }
        }
    }
}

/// Records forward latency when dropped.
struct ForwardTimer {
    start: Instant,
    target: Arc<Target>,
    requests: Arc<LatencyTimer>,
    sink: Arc<dyn MetricsSink>,
}

impl Drop for ForwardTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.target.timer().update(elapsed);
        self.requests.update(elapsed);
        self.sink.record_target(&self.target, elapsed);
        self.sink.record_request(elapsed);
    }
}

/// Response body that stops the forward timer when the stream ends.
struct TimedBody {
    inner: Body,
    timer: Option<ForwardTimer>,
}

impl HttpBody for TimedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.timer.take();
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Point `request` at `target`, keeping the original path and query.
fn rewrite_request(request: Request<Body>, target: &Url) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    let authority = match (target.host_str(), target.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    let path = join_paths(target.path(), parts.uri.path());

    let mut uri = format!("{}://{}{}", target.scheme(), authority, path);
    if let Some(query) = merge_query(target.query(), parts.uri.query()) {
        uri.push('?');
        uri.push_str(&query);
    }

    parts.uri = uri.parse::<Uri>()?;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(HOST, HeaderValue::from_str(&authority)?);

    Ok(Request::from_parts(parts, body))
}

/// Join two paths with exactly one slash between them.
pub fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Combine target and request query strings with `&`.
pub fn merge_query(target: Option<&str>, request: Option<&str>) -> Option<String> {
    let target = target.filter(|q| !q.is_empty());
    let request = request.filter(|q| !q.is_empty());
    match (target, request) {
        (Some(t), Some(r)) => Some(format!("{t}&{r}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/", "/foo"), "/foo");
        assert_eq!(join_paths("/base", "/foo"), "/base/foo");
        assert_eq!(join_paths("/base/", "/foo"), "/base/foo");
        assert_eq!(join_paths("/base", "foo"), "/base/foo");
        assert_eq!(join_paths("/base/", "foo"), "/base/foo");
    }

    #[test]
    fn test_merge_query() {
        assert_eq!(merge_query(None, None), None);
        assert_eq!(merge_query(Some("a=1"), None).as_deref(), Some("a=1"));
        assert_eq!(merge_query(None, Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(merge_query(Some("a=1"), Some("b=2")).as_deref(), Some("a=1&b=2"));
        assert_eq!(merge_query(Some(""), Some("b=2")).as_deref(), Some("b=2"));
    }

    #[test]
    fn test_rewrite_request() {
        let target = Url::parse("http://10.0.0.1:8080/base?key=k").unwrap();
        let request = Request::builder()
            .uri("/users/1?page=2")
            .header("host", "example.com")
            .header("connection", "keep-alive, x-private")
            .header("x-private", "secret")
            .header("accept", "*/*")
            .body(Body::empty())
            .unwrap();

        let rewritten = rewrite_request(request, &target).unwrap();
        assert_eq!(
            rewritten.uri().to_string(),
            "http://10.0.0.1:8080/base/users/1?key=k&page=2"
        );
        assert_eq!(rewritten.headers()["host"], "10.0.0.1:8080");
        assert_eq!(rewritten.headers()["accept"], "*/*");
        assert!(rewritten.headers().get("connection").is_none());
        assert!(rewritten.headers().get("x-private").is_none());
    }

    #[test]
    fn test_rewrite_default_port() {
        let target = Url::parse("http://backend.internal").unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let rewritten = rewrite_request(request, &target).unwrap();
        assert_eq!(rewritten.uri().to_string(), "http://backend.internal/");
        assert_eq!(rewritten.headers()["host"], "backend.internal");
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ProxyError::ShuttingDown.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ProxyError::NoRouteMatch {
                host: "a".into(),
                path: "/".into()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::from(EnrichError::MalformedAddress("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::TransportFailure {
                target: "http://a/".into(),
                source: TransportError::other("refused"),
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_invalid_target_is_internal_error() {
        let source = axum::http::Error::from("http://[::1".parse::<Uri>().unwrap_err());
        let err = ProxyError::InvalidTarget {
            target: "http://[::1".into(),
            source,
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
