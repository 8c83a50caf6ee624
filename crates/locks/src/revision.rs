//! Per-zone monotonic revision counter
//!
//! The revision counter is a total order over all metadata-mutating
//! operations within one zone; between zones there is no ordering
//! guarantee. Bumps go through the per-zone entry lock (single writer per
//! key), so concurrent bumps never return duplicate values.

use dashmap::DashMap;

/// Strictly monotonic counter per zone
#[derive(Default)]
pub struct RevisionCounter {
    revisions: DashMap<String, u64>,
}

impl RevisionCounter {
    /// Create a counter with every zone at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically increment and return the new revision for a zone
    pub fn bump(&self, zone_id: &str) -> u64 {
        let mut entry = self.revisions.entry(zone_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Current revision without incrementing (0 for unseen zones)
    pub fn get(&self, zone_id: &str) -> u64 {
        self.revisions.get(zone_id).map(|r| *r).unwrap_or(0)
    }

    /// Bucket a revision into a cache-key window
    ///
    /// Cache keys embed `revision / window`; a bump that crosses a window
    /// boundary changes every key derived from it, invalidating the old
    /// entries by mismatch instead of explicit purge.
    pub fn bucket(&self, zone_id: &str, window: u64) -> u64 {
        self.get(zone_id) / window.max(1)
    }
}

/// Optimistic-concurrency generation guard
///
/// Agent-record transitions present the generation they read; a stale
/// generation fails with a typed error instead of clobbering a concurrent
/// transition.
#[derive(Default)]
pub struct GenerationGuard {
    generations: DashMap<String, u64>,
}

impl GenerationGuard {
    /// Create an empty guard table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation of a key (0 when never transitioned)
    pub fn get(&self, key: &str) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// Attempt a transition expecting the given generation
    ///
    /// On match the generation advances and the new value is returned;
    /// on mismatch nothing changes and `StaleGeneration` is returned.
    pub fn transition(&self, key: &str, expected_generation: u64) -> nexus_core::Result<u64> {
        let mut entry = self.generations.entry(key.to_string()).or_insert(0);
        if *entry != expected_generation {
            return Err(nexus_core::NexusError::StaleGeneration {
                expected: expected_generation,
                actual: *entry,
            });
        }
        *entry += 1;
        Ok(*entry)
    }
}
