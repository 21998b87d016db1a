//! Outbound forwarding transports.
//!
//! # Responsibilities
//! - Define the capability the proxy handler forwards through
//! - Provide the production HTTP/HTTPS client implementation
//!
//! # Design Decisions
//! - Object-safe trait returning a boxed future, so handlers hold `Arc<dyn Transport>`
//! - Responses are returned with their body unread; callers stream it
//! - Dropping the returned future abandons the upstream request

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// Future returned by [`Transport::send`].
pub type ResponseFuture = BoxFuture<'static, Result<Response<Body>, TransportError>>;

/// Failure to obtain a response from a target.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }
}

/// Sends a request to a backend and yields its streamed response.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request<Body>) -> ResponseFuture;
}

/// Pooled HTTP/1.1 client transport for `http` and `https` targets.
///
/// `https` targets are verified against the bundled webpki roots.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        connector.enforce_http(false);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Body>) -> ResponseFuture {
        let response = self.client.request(request);
        Box::pin(async move {
            let response = response.await?;
            Ok(response.map(Body::new))
        })
    }
}
