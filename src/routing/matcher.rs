//! Route matching logic.
//!
//! # Responsibilities
//! - Extract the routing host and path from a request
//! - Match host (exact or `*.suffix` wildcard, case-insensitive)
//! - Match path prefix (case-sensitive)
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110), ports are ignored
//! - Path matching is a plain byte prefix; `/api` also matches `/apis`
//! - No regex to guarantee O(n) matching

use axum::http::Request;

use crate::routing::table::TableError;

/// Host part of a route's match key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostPattern {
    /// Matches exactly one (lowercased) host.
    Exact(String),
    /// `*.example.com`: matches any host ending in `.example.com`.
    Wildcard(String),
}

impl HostPattern {
    /// Parse a configured host into a pattern.
    pub fn parse(raw: &str) -> Result<Self, TableError> {
        let host = raw.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(TableError::InvalidHost(raw.to_string()));
        }

        if let Some(suffix) = host.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(TableError::InvalidHost(raw.to_string()));
            }
            return Ok(Self::Wildcard(format!(".{suffix}")));
        }

        if host.contains('*') || host.contains('/') {
            return Err(TableError::InvalidHost(raw.to_string()));
        }
        Ok(Self::Exact(normalize_host(&host)))
    }

    /// Returns true if the normalized `host` matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(expected) => host == expected,
            // The leading dot keeps `example.com` itself from matching.
            Self::Wildcard(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

impl std::fmt::Display for HostPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(host) => f.write_str(host),
            Self::Wildcard(suffix) => write!(f, "*{suffix}"),
        }
    }
}

/// Lowercase a host and strip any port, keeping bracketed IPv6 intact.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            // A second colon means an unbracketed IPv6 literal, not a port.
            Some((host, _port)) if !host.contains(':') => host,
            _ => raw,
        }
    };
    host.to_ascii_lowercase()
}

/// Host a request is addressed to: the `Host` header, else the URI authority.
pub fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .map(normalize_host)
        .unwrap_or_default()
}

/// Returns true if `path` starts with `prefix`.
pub fn path_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
}
