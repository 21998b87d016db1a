//! Immutable routing table snapshots.
//!
//! # Responsibilities
//! - Build routes and targets from route definitions
//! - Index routes by host for fast lookup
//! - Resolve a request to exactly one target or no match
//!
//! # Design Decisions
//! - A table is never mutated after `build`; replacement publishes a new one
//! - Routes live in one arena `Vec`, the host index stores positions into it
//! - Precedence: exact host, then wildcard host (longest suffix), then
//!   host-less routes; within each, the longest path prefix wins
//! - Targets are `Arc`ed so in-flight requests outlive a replace

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::Request;
use url::Url;

use crate::observability::{LatencyTimer, TimerRegistry};
use crate::routing::matcher::{path_matches, request_host, HostPattern};
use crate::routing::selection::WeightedSet;

/// Source of table versions; only uniqueness and ordering matter.
static TABLE_VERSION: AtomicU64 = AtomicU64::new(1);

/// Errors raised while building a table from definitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("invalid host pattern {0:?}")]
    InvalidHost(String),
    #[error("path {0:?} must start with '/'")]
    InvalidPath(String),
    #[error("invalid target url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("route for service {0:?} has an empty service name")]
    EmptyService(String),
}

/// Definition of a single target, as produced by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDef {
    pub url: String,
    pub weight: u32,
}

/// Definition of a route before it is compiled into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub service: String,
    /// `None` matches every host.
    pub host: Option<String>,
    pub path: String,
    pub targets: Vec<TargetDef>,
}

/// One backend destination.
#[derive(Debug)]
pub struct Target {
    service: String,
    url: Url,
    weight: u32,
    name: String,
    timer: Arc<LatencyTimer>,
}

impl Target {
    /// Service this target belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Base URL requests are rewritten to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Timer registry key, `service.hostpath.url`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latency timer updated after every completed forward.
    pub fn timer(&self) -> &LatencyTimer {
        &self.timer
    }
}

/// A host+path match key with its weighted targets.
#[derive(Debug)]
pub struct Route {
    host: Option<HostPattern>,
    path: String,
    targets: Vec<Arc<Target>>,
    weights: WeightedSet,
}

impl Route {
    pub fn host(&self) -> Option<&HostPattern> {
        self.host.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    /// Pick a target by weight, pinned when `trace` is non-empty.
    pub fn select(&self, trace: Option<&str>) -> Option<Arc<Target>> {
        self.weights
            .select(trace)
            .and_then(|i| self.targets.get(i))
            .cloned()
    }
}

/// Immutable routing snapshot.
#[derive(Debug)]
pub struct RoutingTable {
    version: u64,
    routes: Vec<Route>,
    exact: HashMap<String, Vec<usize>>,
    /// Ordered by suffix length, longest first.
    wildcard: Vec<(HostPattern, Vec<usize>)>,
    any_host: Vec<usize>,
}

impl RoutingTable {
    /// A table without routes; every lookup misses.
    pub fn empty() -> Self {
        Self::index(Vec::new())
    }

    /// Compile route definitions into a table.
    ///
    /// Definitions sharing host and path are merged into one route, keeping
    /// target order. Timers are taken from `timers` so that targets surviving
    /// a reload keep their statistics.
    pub fn build(defs: Vec<RouteDef>, timers: &TimerRegistry) -> Result<Self, TableError> {
        let mut routes: Vec<(Option<HostPattern>, String, Vec<Arc<Target>>)> = Vec::new();
        let mut positions: HashMap<(Option<HostPattern>, String), usize> = HashMap::new();

        for def in defs {
            if def.service.trim().is_empty() {
                return Err(TableError::EmptyService(def.service));
            }
            if !def.path.starts_with('/') {
                return Err(TableError::InvalidPath(def.path));
            }
            let host = match def.host.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(raw) => Some(HostPattern::parse(raw)?),
            };

            let key = (host.clone(), def.path.clone());
            let pos = *positions.entry(key).or_insert_with(|| {
                routes.push((host.clone(), def.path.clone(), Vec::new()));
                routes.len() - 1
            });

            let src = match &host {
                Some(h) => format!("{h}{}", def.path),
                None => def.path.clone(),
            };
            for target in def.targets {
                let url = parse_target_url(&target.url)?;
                let name = format!("{}.{}.{}", def.service, src, url);
                let timer = timers.get_or_register(&name);
                routes[pos].2.push(Arc::new(Target {
                    service: def.service.clone(),
                    url,
                    weight: target.weight,
                    name,
                    timer,
                }));
            }
        }

        let routes = routes
            .into_iter()
            .map(|(host, path, targets)| Route {
                weights: WeightedSet::new(targets.iter().map(|t| t.weight)),
                host,
                path,
                targets,
            })
            .collect();

        Ok(Self::index(routes))
    }

    fn index(routes: Vec<Route>) -> Self {
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut wildcard: Vec<(HostPattern, Vec<usize>)> = Vec::new();
        let mut any_host = Vec::new();

        for (i, route) in routes.iter().enumerate() {
            match &route.host {
                Some(HostPattern::Exact(host)) => exact.entry(host.clone()).or_default().push(i),
                Some(pattern @ HostPattern::Wildcard(_)) => {
                    match wildcard.iter_mut().find(|(p, _)| p == pattern) {
                        Some((_, bucket)) => bucket.push(i),
                        None => wildcard.push((pattern.clone(), vec![i])),
                    }
                }
                None => any_host.push(i),
            }
        }

        let by_path_len = |bucket: &mut Vec<usize>| {
            bucket.sort_by(|&a, &b| routes[b].path.len().cmp(&routes[a].path.len()));
        };
        exact.values_mut().for_each(|bucket| by_path_len(bucket));
        wildcard.iter_mut().for_each(|(_, bucket)| by_path_len(bucket));
        by_path_len(&mut any_host);
        wildcard.sort_by_key(|(pattern, _)| std::cmp::Reverse(pattern.to_string().len()));

        Self {
            version: TABLE_VERSION.fetch_add(1, Ordering::Relaxed),
            routes,
            exact,
            wildcard,
            any_host,
        }
    }

    /// Unique, increasing identifier of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a request to a target.
    ///
    /// Returns `None` when no route matches or the matching route has no
    /// targets. Read-only: no timers or metrics are touched.
    pub fn lookup<B>(&self, req: &Request<B>, trace: Option<&str>) -> Option<Arc<Target>> {
        let host = request_host(req);
        self.lookup_host_path(&host, req.uri().path(), trace)
    }

    /// Resolve a normalized host and a path to a target.
    pub fn lookup_host_path(&self, host: &str, path: &str, trace: Option<&str>) -> Option<Arc<Target>> {
        self.find_route(host, path)?.select(trace)
    }

    /// First route in precedence order that matches and has targets.
    pub fn find_route(&self, host: &str, path: &str) -> Option<&Route> {
        let exact = self.exact.get(host).into_iter();
        let wildcard = self
            .wildcard
            .iter()
            .filter(|(pattern, _)| pattern.matches(host))
            .map(|(_, bucket)| bucket);
        let any_host = std::iter::once(&self.any_host);

        exact
            .chain(wildcard)
            .chain(any_host)
            .flat_map(|bucket| bucket.iter().map(move |&i| &self.routes[i]))
            .find(|route| !route.targets.is_empty() && path_matches(&route.path, path))
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::empty()
    }
}

/// Renders the table in route command syntax.
impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for route in &self.routes {
            let src = match &route.host {
                Some(host) => format!("{host}{}", route.path),
                None => route.path.clone(),
            };
            for target in &route.targets {
                writeln!(
                    f,
                    "route add {} {} {} weight {}",
                    target.service, src, target.url, target.weight
                )?;
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_target_url(raw: &str) -> Result<Url, TableError> {
    let invalid = |reason: String| TableError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
