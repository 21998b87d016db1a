//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate listen addresses and provenance header settings
//! - Check inline routes compile: service, host pattern, path, target URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::ProxyConfig;
use crate::http::headers::HeaderConfig;
use crate::routing::matcher::HostPattern;
use crate::routing::table::parse_target_url;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address {:?}", config.listener.bind_address),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    for (field, secs) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be at least 1"));
        }
    }

    let proxy = &config.proxy;
    if let Err(e) = HeaderConfig::new(
        &proxy.local_ip,
        &proxy.client_ip_header,
        &proxy.tls_header,
        &proxy.tls_header_value,
    ) {
        errors.push(ValidationError::new("proxy", e.to_string()));
    }
    let trace = proxy.trace_header.trim();
    if !trace.is_empty() && HeaderName::from_bytes(trace.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "proxy.trace_header",
            format!("invalid header name {trace:?}"),
        ));
    }

    for (i, route) in config.routes.iter().enumerate() {
        let field = |name: &str| format!("routes[{i}].{name}");

        if route.service.trim().is_empty() {
            errors.push(ValidationError::new(field("service"), "must not be empty"));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                field("path_prefix"),
                format!("{:?} must start with '/'", route.path_prefix),
            ));
        }
        if let Some(host) = route.host.as_deref().filter(|h| !h.trim().is_empty()) {
            if let Err(e) = HostPattern::parse(host.trim()) {
                errors.push(ValidationError::new(field("host"), e.to_string()));
            }
        }
        for (j, target) in route.targets.iter().enumerate() {
            if let Err(e) = parse_target_url(&target.url) {
                errors.push(ValidationError::new(field(&format!("targets[{j}].url")), e.to_string()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
