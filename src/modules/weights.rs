//! Source Weight Registry: a static, read-only-at-runtime mapping of
//! provider identifier to trust weight, falling back to a `default` entry.
//! Reconfiguration is treated as a process restart — there is no mutation
//! API once constructed, matching the spec's "read-only after
//! initialization" ownership rule.

use std::collections::HashMap;

const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct SourceWeightRegistry {
    weights: HashMap<String, f64>,
}

impl Default for SourceWeightRegistry {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }
}

impl SourceWeightRegistry {
    /// Builds a registry from a list of `(source, weight)` pairs. Weights
    /// must be non-negative; negative entries are dropped silently at
    /// construction since the registry has no fallible API surface —
    /// callers that need a typed rejection should validate before calling.
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        let weights = entries
            .into_iter()
            .filter(|(_, weight)| *weight >= 0.0)
            .collect();
        Self { weights }
    }

    /// Returns the configured weight for `source`, or the default (1.0)
    /// if no entry exists. Lookup is case-sensitive on the canonical
    /// source string the caller supplies.
    pub fn weight_of(&self, source: &str) -> f64 {
        self.weights.get(source).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn default_weight() -> f64 {
        DEFAULT_WEIGHT
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_falls_back_to_default() {
        let registry = SourceWeightRegistry::default();
        assert_eq!(registry.weight_of("alpha_vantage"), 1.0);
    }

    #[test]
    fn known_source_returns_configured_weight() {
        let registry = SourceWeightRegistry::new([("alpha_vantage".to_string(), 2.5)]);
        assert_eq!(registry.weight_of("alpha_vantage"), 2.5);
        assert_eq!(registry.weight_of("finnhub"), 1.0);
    }

    #[test]
    fn negative_weights_are_rejected_at_construction() {
        let registry = SourceWeightRegistry::new([("finnhub".to_string(), -1.0)]);
        assert!(registry.is_empty());
        assert_eq!(registry.weight_of("finnhub"), 1.0);
    }
}
