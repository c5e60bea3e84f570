//! Last-Value Cache: the only mutable shared structure inside the core.
//!
//! Grounded in the teacher's `IntelligentCache` (`Arc<RwLock<HashMap<...>>>`
//! guarding per-key entries), trimmed down from a full TTL/eviction/
//! compression response cache to exactly what the spec asks for: a
//! concurrent, non-durable, non-evicting map from symbol to the latest
//! consensus and latest normalized set. Writes are single-writer per
//! symbol (the scheduler); reads (e.g. a debug snapshot) may run
//! concurrently across symbols without observing a torn record, since each
//! entry is replaced atomically under the write lock.

use crate::modules::engine::ConsensusPrice;
use crate::modules::normalizer::CanonicalQuote;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct LastValueEntry {
    pub last_consensus: ConsensusPrice,
    pub last_canonical_set: Vec<CanonicalQuote>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct LastValueCache {
    entries: Arc<RwLock<HashMap<String, LastValueEntry>>>,
}

impl LastValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the entry for `consensus.symbol`.
    pub fn update(&self, consensus: ConsensusPrice, canonical_set: Vec<CanonicalQuote>) {
        let entry = LastValueEntry {
            last_updated_at: Utc::now(),
            last_canonical_set: canonical_set,
            last_consensus: consensus,
        };
        let mut guard = self.entries.write().expect("last-value cache lock poisoned");
        guard.insert(entry.last_consensus.symbol.clone(), entry);
    }

    /// Returns a consistent snapshot (a clone) of one symbol's entry.
    pub fn get(&self, symbol: &str) -> Option<LastValueEntry> {
        self.entries
            .read()
            .expect("last-value cache lock poisoned")
            .get(symbol)
            .cloned()
    }

    /// Snapshot of every symbol currently cached, for the debug surface.
    pub fn snapshot(&self) -> HashMap<String, LastValueEntry> {
        self.entries
            .read()
            .expect("last-value cache lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("last-value cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the debug surface's data contract: `{lastAggregated,
    /// lastNormalized, updatedAt}` snapshotted under a single read lock so
    /// the two maps are mutually consistent, not assembled from two
    /// separate reads that could interleave with a write.
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let guard = self.entries.read().expect("last-value cache lock poisoned");
        let mut last_aggregated = HashMap::with_capacity(guard.len());
        let mut last_normalized = HashMap::with_capacity(guard.len());
        let mut updated_at = 0i64;
        for (symbol, entry) in guard.iter() {
            last_aggregated.insert(symbol.clone(), entry.last_consensus.clone());
            last_normalized.insert(symbol.clone(), entry.last_canonical_set.clone());
            updated_at = updated_at.max(entry.last_updated_at.timestamp_millis());
        }
        DebugSnapshot {
            last_aggregated,
            last_normalized,
            updated_at,
        }
    }
}

/// The debug surface's data contract (§6): a point-in-time view of every
/// symbol's latest consensus and latest normalized set. Specified as data
/// only — the core does not itself serve this over a transport.
#[derive(Debug, Clone)]
pub struct DebugSnapshot {
    pub last_aggregated: HashMap<String, ConsensusPrice>,
    pub last_normalized: HashMap<String, Vec<CanonicalQuote>>,
    pub updated_at: i64,
}
