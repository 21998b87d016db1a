//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the routing table from configuration
//! - Initialize subsystems in dependency order
//! - Start background tasks (signals, metrics, config reload)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderName;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::{ConfigError, ConfigWatcher, ProxyConfig};
use crate::http::headers::{HeaderConfig, HeaderConfigError};
use crate::http::server::load_tls_config;
use crate::http::{HttpServer, HyperTransport, ProxyHandler};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::ShutdownCoordinator;
use crate::observability::metrics::init_metrics;
use crate::observability::{MetricsSink, NoopSink, PrometheusSink, TimerRegistry};
use crate::routing::{RoutingTable, SharedTable, TableError};

/// Fatal error while bringing the proxy up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid routes: {0}")]
    Routes(#[from] TableError),
    #[error("invalid header settings: {0}")]
    Headers(#[from] HeaderConfigError),
    #[error("invalid address {addr:?}: {source}")]
    Address {
        addr: String,
        source: AddrParseError,
    },
    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
    #[error("failed to load TLS material: {0}")]
    Tls(std::io::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_addr(addr: &str) -> Result<SocketAddr, StartupError> {
    addr.parse().map_err(|source| StartupError::Address {
        addr: addr.to_string(),
        source,
    })
}

/// Build the handler from `config`.
pub fn build_handler(
    config: &ProxyConfig,
    table: Arc<SharedTable>,
    shutdown: ShutdownCoordinator,
    sink: Arc<dyn MetricsSink>,
) -> Result<ProxyHandler, StartupError> {
    let proxy = &config.proxy;
    let headers = HeaderConfig::new(
        &proxy.local_ip,
        &proxy.client_ip_header,
        &proxy.tls_header,
        &proxy.tls_header_value,
    )?;
    let trace = proxy.trace_header.trim();
    let trace_header = if trace.is_empty() {
        None
    } else {
        Some(
            HeaderName::from_bytes(trace.as_bytes())
                .map_err(|_| HeaderConfigError::InvalidName(trace.to_string()))?,
        )
    };
    let transport = HyperTransport::new(config.timeouts.connect());

    Ok(ProxyHandler::new(table, shutdown, Arc::new(transport))
        .with_headers(headers)
        .with_trace_header(trace_header)
        .with_metrics(sink))
}

/// Run the proxy until shutdown completes.
///
/// With `config_path`, route changes in that file are applied without a restart.
pub async fn run(config: ProxyConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    let timers = Arc::new(TimerRegistry::new());
    let table = RoutingTable::build(config.route_defs()?, &timers)?;
    let table = Arc::new(SharedTable::new(table));
    tracing::info!(routes = table.load().len(), "Routing table built");

    let shutdown = ShutdownCoordinator::new(config.shutdown.drain_timeout());

    let sink: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
        init_metrics(parse_addr(&config.observability.metrics_address)?);
        Arc::new(PrometheusSink)
    } else {
        Arc::new(NoopSink)
    };

    let handler = Arc::new(build_handler(&config, Arc::clone(&table), shutdown.clone(), sink)?);

    spawn_signal_handler(shutdown.clone());

    // Dropping the watcher stops file notifications, so it lives until `run` returns.
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            let watcher = watcher.run()?;
            let reloader = RouteReloader::new(config.clone(), Arc::clone(&table), Arc::clone(&timers));
            tokio::spawn(reload_routes(reloader, updates, shutdown.clone()));
            Some(watcher)
        }
        None => None,
    };

    let server = HttpServer::new(Arc::clone(&handler), shutdown)
        .with_request_timeout(config.timeouts.request());
    let addr = parse_addr(&config.listener.bind_address)?;

    match &config.listener.tls {
        Some(tls) => {
            let rustls = load_tls_config(&tls.cert_path, &tls.key_path)
                .await
                .map_err(StartupError::Tls)?;
            server.run_tls(addr, rustls).await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            server.run(listener).await?;
        }
    }

    log_latency_summary(&handler, &timers);
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_latency_summary(handler: &ProxyHandler, timers: &TimerRegistry) {
    let requests = handler.requests().snapshot();
    tracing::info!(
        count = requests.count,
        mean_ms = requests.mean.as_secs_f64() * 1000.0,
        ewma_ms = requests.ewma.as_secs_f64() * 1000.0,
        max_ms = requests.max.as_secs_f64() * 1000.0,
        "Forwarded request latency"
    );
    for (name, snap) in timers.snapshot().into_iter().filter(|(_, snap)| snap.count > 0) {
        tracing::info!(
            target_name = %name,
            count = snap.count,
            mean_ms = snap.mean.as_secs_f64() * 1000.0,
            ewma_ms = snap.ewma.as_secs_f64() * 1000.0,
            max_ms = snap.max.as_secs_f64() * 1000.0,
            "Target latency"
        );
    }
}

/// Applies reloaded configs to the live routing table.
struct RouteReloader {
    current: ProxyConfig,
    table: Arc<SharedTable>,
    timers: Arc<TimerRegistry>,
}

impl RouteReloader {
    fn new(current: ProxyConfig, table: Arc<SharedTable>, timers: Arc<TimerRegistry>) -> Self {
        Self {
            current,
            table,
            timers,
        }
    }

    /// Publish the routes of `config`, returning the changed sections that need a restart.
    ///
    /// `config` becomes the baseline for the next reload even if its routes are rejected.
    fn apply(&mut self, config: ProxyConfig) -> Vec<&'static str> {
        let ignored = restart_required(&self.current, &config);
        for section in &ignored {
            tracing::warn!(section = %section, "Config section changed; restart required to apply");
        }

        let built = config
            .route_defs()
            .map_err(|e| e.to_string())
            .and_then(|defs| RoutingTable::build(defs, &self.timers).map_err(|e| e.to_string()));
        match built {
            Ok(new_table) => {
                drop(self.table.replace(new_table));
                let pruned = self.timers.prune();
                tracing::debug!(pruned, remaining = self.timers.len(), "Pruned target timers");
            }
            Err(error) => {
                tracing::error!(%error, "Reloaded routes rejected, keeping current table");
            }
        }

        self.current = config;
        ignored
    }
}

/// Apply reloaded configs until draining begins.
async fn reload_routes(
    mut reloader: RouteReloader,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    shutdown: ShutdownCoordinator,
) {
    let draining = shutdown.draining();
    tokio::pin!(draining);

    loop {
        tokio::select! {
            _ = &mut draining => return,
            update = updates.recv() => match update {
                Some(config) => {
                    reloader.apply(config);
                }
                None => return,
            },
        }
    }
}

fn restart_required(current: &ProxyConfig, new: &ProxyConfig) -> Vec<&'static str> {
    [
        ("listener", current.listener != new.listener),
        ("proxy", current.proxy != new.proxy),
        ("shutdown", current.shutdown != new.shutdown),
        ("timeouts", current.timeouts != new.timeouts),
        ("observability", current.observability != new.observability),
    ]
    .into_iter()
    .filter_map(|(section, changed)| changed.then_some(section))
    .collect()
}
