//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → proxy.rs (shutdown check, route lookup)
//!     → headers.rs (provenance headers)
//!     → transport.rs (forward to target)
//!     → proxy.rs (stream response, record latency)
//!     → Send to client
//! ```

pub mod headers;
pub mod proxy;
pub mod server;
pub mod transport;

pub use headers::{enrich, EnrichError, HeaderConfig};
pub use proxy::{ProxyError, ProxyHandler, RequestContext};
pub use server::HttpServer;
pub use transport::{HyperTransport, Transport, TransportError};
