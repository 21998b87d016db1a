//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler on every path
//! - Wire up middleware (tracing, request ID)
//! - Serve plain TCP or rustls TLS listeners
//! - Close listeners once the shutdown coordinator reports `Stopped`
//!
//! # Design Decisions
//! - Requests are bounded by `TimeoutLayer`; the drain is bounded by `Stopped`
//! - Connections still open `CLOSE_GRACE` after `Stopped` are abandoned

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::proxy::{ProxyHandler, RequestContext};
use crate::lifecycle::ShutdownCoordinator;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProxyHandler>,
    /// Whether this router serves a TLS listener.
    pub tls: bool,
}

/// How long open connections get to close after the drain window.
pub const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Default upper bound on a single proxied request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    handler: Arc<ProxyHandler>,
    shutdown: ShutdownCoordinator,
    request_timeout: Duration,
}

impl HttpServer {
    pub fn new(handler: Arc<ProxyHandler>, shutdown: ShutdownCoordinator) -> Self {
        Self {
            handler,
            shutdown,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Requests without a response after `timeout` get `408 Request Timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self, tls: bool) -> Router {
        let state = AppState {
            handler: Arc::clone(&self.handler),
            tls,
        };

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(self.request_timeout)),
            )
    }

    /// Serve plain HTTP on `listener` until the drain window has elapsed.
    ///
    /// Returns at most [`CLOSE_GRACE`] after the coordinator reaches `Stopped`.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "HTTP server starting");

        let app = self
            .router(false)
            .into_make_service_with_connect_info::<SocketAddr>();

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(self.shutdown.stopped())
            .into_future();
        let stopped = self.shutdown.stopped();

        tokio::select! {
            result = serve => result?,
            _ = async {
                stopped.await;
                tokio::time::sleep(CLOSE_GRACE).await;
            } => {
                tracing::warn!(address = %addr, "Connections still open after drain window, closing");
            }
        }

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until the drain window has elapsed.
    pub async fn run_tls(self, addr: SocketAddr, tls: RustlsConfig) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, tls = true, "HTTP server starting");

        let handle = axum_server::Handle::new();
        let stopped = self.shutdown.stopped();
        let closer = handle.clone();
        tokio::spawn(async move {
            stopped.await;
            closer.graceful_shutdown(Some(CLOSE_GRACE));
        });

        let app = self
            .router(true)
            .into_make_service_with_connect_info::<SocketAddr>();

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}

/// Load TLS configuration from PEM certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    for (kind, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{kind} file not found: {}", path.display()),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Entry point for every proxied request.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let ctx = RequestContext::new(addr.to_string(), state.tls);
    state.handler.handle(ctx, request).await
}
