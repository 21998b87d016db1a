//! Dynamic HTTP reverse proxy library.
//!
//! Requests are matched against a hot-swappable routing table, enriched with
//! provenance headers and streamed to a weighted target. A shutdown
//! coordinator drains in-flight work before listeners close.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use http::{HttpServer, ProxyHandler};
pub use lifecycle::{ShutdownCoordinator, ShutdownState};
pub use routing::{RoutingTable, SharedTable};
