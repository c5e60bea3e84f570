//! Per-ingestor resilience metrics: consecutive failures, a simple
//! open/closed circuit state, and a running success rate. Grounded in the
//! teacher's `ResilienceManager`/`ResilienceMetrics`/`CircuitState` trio,
//! generalized from a fixed four-provider enum to an open-ended
//! `source: String` keyed map since this core's ingestor set is
//! configuration-driven. Wired to the scheduler's fetch loop rather than
//! duplicating the retry/backoff logic in [`crate::modules::retry`] — this
//! module only observes outcomes, it does not itself retry anything.

use std::collections::HashMap;
use std::sync::RwLock;

/// Consecutive ingestor failures before the circuit opens. Not
/// configurable in this core — the scheduler keeps querying an open-circuit
/// ingestor regardless (it has no fallback provider to switch to), so the
/// state is informational, surfaced on the debug/metrics surface rather
/// than gating behavior.
const OPEN_CIRCUIT_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestorMetrics {
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub circuit_state: CircuitState,
}

impl IngestorMetrics {
    /// Successes / attempts, or `1.0` with zero attempts (no evidence of
    /// failure yet is treated as fully healthy).
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_attempts as f64
    }
}

/// A concurrent map from ingestor name to its [`IngestorMetrics`], updated
/// by the scheduler after every fetch attempt (post-retry, so a fetch that
/// succeeded only after retries still counts as one success).
#[derive(Debug, Default)]
pub struct ResilienceRegistry {
    metrics: RwLock<HashMap<String, IngestorMetrics>>,
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, ingestor: &str) {
        let mut guard = self.metrics.write().expect("resilience registry lock poisoned");
        let entry = guard.entry(ingestor.to_string()).or_default();
        entry.total_attempts += 1;
        entry.total_successes += 1;
        entry.consecutive_failures = 0;
        entry.circuit_state = CircuitState::Closed;
    }

    pub fn record_failure(&self, ingestor: &str) {
        let mut guard = self.metrics.write().expect("resilience registry lock poisoned");
        let entry = guard.entry(ingestor.to_string()).or_default();
        entry.total_attempts += 1;
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= OPEN_CIRCUIT_THRESHOLD {
            entry.circuit_state = CircuitState::Open;
        }
    }

    pub fn snapshot(&self) -> HashMap<String, IngestorMetrics> {
        self.metrics
            .read()
            .expect("resilience registry lock poisoned")
            .clone()
    }
}
