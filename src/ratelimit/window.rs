//! Counting window implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Index of the `period_ms`-long time block containing `at_ms`.
pub fn time_block(at_ms: u64, period_ms: u64) -> u64 {
    at_ms / period_ms
}

/// One period's worth of per-identity counters.
///
/// A window is only ever mutated by counter increments. Once the store
/// replaces it, callers that still hold it keep counting into it; nothing
/// clears or reuses it.
#[derive(Debug)]
pub struct Window {
    /// Position in the sequence of windows published by a store
    generation: u64,
    /// Creation time in milliseconds since the Unix epoch
    created_at_ms: u64,
    /// Admission counts keyed by identity
    counters: DashMap<String, AtomicU64>,
}

impl Window {
    /// Create an empty window.
    pub fn new(generation: u64, created_at_ms: u64) -> Self {
        Self {
            generation,
            created_at_ms,
            counters: DashMap::new(),
        }
    }

    /// Increment the identity's counter and return the post-increment value.
    ///
    /// Concurrent calls for the same identity never lose an update.
    pub fn increment(&self, identity: &str) -> u64 {
        // Existing identities skip the key allocation.
        if let Some(counter) = self.counters.get(identity) {
            return counter.fetch_add(1, Ordering::AcqRel) + 1;
        }

        self.counters
            .entry(identity.to_owned())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    /// Current count for an identity, `None` if it was never seen in this window.
    pub fn count(&self, identity: &str) -> Option<u64> {
        self.counters
            .get(identity)
            .map(|c| c.load(Ordering::Acquire))
    }

    /// Number of identities seen in this window.
    pub fn identity_count(&self) -> usize {
        self.counters.len()
    }

    /// Generation number assigned by the store.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Creation time as a UTC timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at_ms as i64)
    }

    /// Whether the window's time block differs from the block containing `now_ms`.
    pub fn is_stale(&self, now_ms: u64, period_ms: u64) -> bool {
        time_block(self.created_at_ms, period_ms) != time_block(now_ms, period_ms)
    }
}
