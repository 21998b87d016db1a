//! Weighted target selection.
//!
//! # Responsibilities
//! - Precompute cumulative weights for a route's targets
//! - Map a point in `[0, total)` to a target index
//! - Derive the point from a trace token or a random draw
//!
//! # Design Decisions
//! - Weights are integers; a route whose weights are all zero is uniform
//! - Trace tokens hash with FNV-1a so the pin is stable across processes
//! - Random draws use `fastrand` (fast, per-thread seeded, not cryptographic)

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Cumulative weight distribution over a route's targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedSet {
    /// `bounds[i]` is the exclusive upper bound of target `i`'s range.
    bounds: Vec<u64>,
    total: u64,
}

impl WeightedSet {
    pub fn new(weights: impl IntoIterator<Item = u32>) -> Self {
        let mut total = 0u64;
        let bounds = weights
            .into_iter()
            .map(|w| {
                total += u64::from(w);
                total
            })
            .collect();
        Self { bounds, total }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Size of the domain points are drawn from.
    ///
    /// Falls back to the target count when every weight is zero.
    fn domain(&self) -> u64 {
        if self.total == 0 {
            self.bounds.len() as u64
        } else {
            self.total
        }
    }

    /// Index of the target whose range contains `point % domain`.
    pub fn index_for(&self, point: u64) -> Option<usize> {
        let domain = self.domain();
        if domain == 0 {
            return None;
        }
        let point = point % domain;

        if self.total == 0 {
            return Some(point as usize);
        }
        // First bound strictly greater than the point.
        Some(self.bounds.partition_point(|&bound| bound <= point))
    }

    /// Select an index, pinned by `trace` when it is non-empty.
    pub fn select(&self, trace: Option<&str>) -> Option<usize> {
        let domain = self.domain();
        if domain == 0 {
            return None;
        }
        let point = match trace {
            Some(token) if !token.is_empty() => trace_hash(token),
            _ => fastrand::u64(0..domain),
        };
        self.index_for(point)
    }
}

/// 64-bit FNV-1a hash of a trace token.
pub fn trace_hash(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
