//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Control plane:
//!     RouteConfig[] / route commands (command.rs)
//!     → RouteDef[]
//!     → table.rs (compile, index by host, sort by path length)
//!     → shared.rs (atomic publish via ArcSwap)
//!
//! Incoming Request (host, path, trace token)
//!     → shared.rs (load current snapshot)
//!     → matcher.rs (host + path prefix)
//!     → selection.rs (weighted or trace-pinned pick)
//!     → Return: Target or no match
//! ```
//!
//! # Design Decisions
//! - Tables are immutable snapshots; reloads publish a whole new table
//! - No regex in hot path (prefix matching only)
//! - Lookup never blocks on, or is blocked by, a replace

pub mod command;
pub mod matcher;
pub mod selection;
pub mod shared;
pub mod table;

pub use matcher::HostPattern;
pub use shared::SharedTable;
pub use table::{Route, RouteDef, RoutingTable, TableError, Target, TargetDef};
