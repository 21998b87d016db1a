//! Lock-free latency timers.
//!
//! # Responsibilities
//! - Accumulate request latency samples from many tasks at once
//! - Keep a decaying average alongside raw count/total/max
//! - Share timers by name across routing table reloads
//!
//! # Design Decisions
//! - All state is atomic; no sample is lost under contention
//! - EWMA stored as f64 bits and updated with a CAS loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// Weight of the previous average when folding in a new sample.
const EWMA_DECAY: f64 = 0.8;

/// Concurrent latency accumulator.
#[derive(Debug)]
pub struct LatencyTimer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    /// Bits of an f64 holding the moving average in nanoseconds.
    ewma_bits: AtomicU64,
}

/// Point-in-time view of a [`LatencyTimer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSnapshot {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub ewma: Duration,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            ewma_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Record a single sample.
    pub fn update(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);

        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);

        let sample = nanos as f64;
        let mut current_bits = self.ewma_bits.load(Ordering::Acquire);
        loop {
            let current = f64::from_bits(current_bits);
            // First sample seeds the average directly.
            let next = if previous == 0 && current == 0.0 {
                sample
            } else {
                current * EWMA_DECAY + sample * (1.0 - EWMA_DECAY)
            };

            match self.ewma_bits.compare_exchange_weak(
                current_bits,
                next.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_bits = actual,
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let count = self.count.load(Ordering::Acquire);
        let total = self.total_nanos.load(Ordering::Relaxed);
        let max = self.max_nanos.load(Ordering::Relaxed);
        let ewma = f64::from_bits(self.ewma_bits.load(Ordering::Acquire));
        let mean = if count == 0 { 0 } else { total / count };

        TimerSnapshot {
            count,
            total: Duration::from_nanos(total),
            max: Duration::from_nanos(max),
            mean: Duration::from_nanos(mean),
            ewma: Duration::from_nanos(ewma.max(0.0) as u64),
        }
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Named timers shared between routing table generations.
///
/// A target that appears in consecutive tables resolves to the same timer,
/// so its statistics survive a reload.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: DashMap<String, Arc<LatencyTimer>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the timer registered under `name`, creating it on first use.
    pub fn get_or_register(&self, name: &str) -> Arc<LatencyTimer> {
        if let Some(timer) = self.timers.get(name) {
            return Arc::clone(timer.value());
        }
        self.timers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LatencyTimer::new()))
            .value()
            .clone()
    }

    /// Names and snapshots of every registered timer.
    pub fn snapshot(&self) -> Vec<(String, TimerSnapshot)> {
        let mut all: Vec<_> = self
            .timers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Drop timers no live target refers to, returning how many went.
    ///
    /// Call after publishing a table and releasing the previous one; a timer
    /// still held by an in-flight request survives until the next prune.
    pub fn prune(&self) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| Arc::strong_count(timer) > 1);
        before.saturating_sub(self.timers.len())
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
