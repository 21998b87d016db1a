//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::{RouteDef, TargetDef};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Header enrichment and trace settings.
    pub proxy: HeaderSettings,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Route definitions mapping requests to targets.
    pub routes: Vec<RouteConfig>,

    /// Optional file of `route add` / `route del` commands, applied after `routes`.
    pub routes_file: Option<PathBuf>,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9999").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9999".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Provenance header settings. Empty strings disable a rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderSettings {
    /// Address of this proxy, appended to `X-Forwarded-For` and `Forwarded`.
    pub local_ip: String,

    /// Header set to the client IP.
    pub client_ip_header: String,

    /// Header set on requests received over TLS.
    pub tls_header: String,

    /// Value of `tls_header`.
    pub tls_header_value: String,

    /// Header carrying the trace token that pins target selection.
    pub trace_header: String,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        Self {
            local_ip: String::new(),
            client_ip_header: String::new(),
            tls_header: String::new(),
            tls_header_value: String::new(),
            trace_header: "trace".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight requests get to finish after shutdown is triggered.
    pub drain_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 1000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time a request may wait for its response headers, in seconds.
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Route configuration mapping a host/path to weighted targets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Service name, used in timer names and metric labels.
    pub service: String,

    /// Host to match: exact, `*.domain` wildcard, or absent for any host.
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Targets requests are spread over.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Target server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Base URL (e.g., "http://127.0.0.1:3000/prefix").
    pub url: String,

    /// Weight for weighted selection (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_weight() -> u32 {
    1
}

impl From<&RouteConfig> for RouteDef {
    fn from(route: &RouteConfig) -> Self {
        RouteDef {
            service: route.service.clone(),
            host: route.host.clone(),
            path: route.path_prefix.clone(),
            targets: route
                .targets
                .iter()
                .map(|t| TargetDef {
                    url: t.url.clone(),
                    weight: t.weight,
                })
                .collect(),
        }
    }
}
