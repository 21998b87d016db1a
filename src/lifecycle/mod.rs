//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Routing table → Handler → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Draining (503 for new requests) → drain timeout → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: refuse new work, drain, close listeners
//! - The drain window is fixed; the listener closes when it elapses

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{ShutdownCoordinator, ShutdownState};
