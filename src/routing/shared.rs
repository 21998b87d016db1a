//! Hot-swappable handle to the current routing table.
//!
//! # Responsibilities
//! - Publish new tables atomically
//! - Serve lookups from whichever table is current
//!
//! # Design Decisions
//! - `ArcSwap` gives lock-free loads; a replace never waits for readers
//! - Readers holding an old snapshot keep it alive until they drop it
//! - Last writer wins; there is no partial update

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::Request;

use crate::routing::table::{RoutingTable, Target};

/// Process-wide routing table shared by the control plane and handlers.
#[derive(Debug)]
pub struct SharedTable {
    current: ArcSwap<RoutingTable>,
}

impl SharedTable {
    pub fn new(initial: RoutingTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Atomically publish `table`, returning the snapshot it replaced.
    pub fn replace(&self, table: RoutingTable) -> Arc<RoutingTable> {
        let routes = table.len();
        let version = table.version();
        let previous = self.current.swap(Arc::new(table));
        tracing::info!(
            version,
            previous_version = previous.version(),
            routes,
            "Routing table published"
        );
        previous
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<RoutingTable> {
        self.current.load_full()
    }

    /// Resolve `req` against the current snapshot.
    pub fn lookup<B>(&self, req: &Request<B>, trace: Option<&str>) -> Option<Arc<Target>> {
        self.current.load().lookup(req, trace)
    }
}

impl Default for SharedTable {
    fn default() -> Self {
        Self::new(RoutingTable::empty())
    }
}
