//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy handler completes a forward:
//!     → timer.rs (per-target and global LatencyTimer)
//!     → metrics.rs (MetricsSink → Prometheus histograms)
//!
//! All subsystems:
//!     → logging.rs (structured tracing events)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic updates, no locks on the hot path)
//! - Timers are keyed by name so reloads keep history

pub mod logging;
pub mod metrics;
pub mod timer;

pub use metrics::{MetricsSink, NoopSink, PrometheusSink};
pub use timer::{LatencyTimer, TimerRegistry, TimerSnapshot};
