//! Aggregator Strategies: the three pluggable consensus laws, all
//! satisfying one contract (`AggregatorStrategy::aggregate`). Each
//! strategy is a plain value — no inheritance, no trait object required by
//! callers that already know which method they want, but `dyn
//! AggregatorStrategy` works for the Aggregation Engine's dynamic
//! dispatch by [`AggregationMethod`].

use crate::modules::normalizer::CanonicalQuote;
use crate::modules::stats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AggregatorError {
    #[error("aggregation requires at least one quote")]
    EmptyInput,
    #[error("total resolved weight is zero")]
    ZeroTotalWeight,
    #[error("trim fraction must be in [0, 0.5), got {0}")]
    InvalidTrimFraction(f64),
    #[error("unknown aggregation method: {0}")]
    UnknownMethod(String),
}

/// The consensus method a caller (or `AggregationOptions`) selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMethod {
    WeightedMean,
    Median,
    TrimmedMean,
}

impl std::str::FromStr for AggregationMethod {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted-mean" => Ok(AggregationMethod::WeightedMean),
            "median" => Ok(AggregationMethod::Median),
            "trimmed-mean" => Ok(AggregationMethod::TrimmedMean),
            other => Err(AggregatorError::UnknownMethod(other.to_string())),
        }
    }
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AggregationMethod::WeightedMean => "weighted-mean",
            AggregationMethod::Median => "median",
            AggregationMethod::TrimmedMean => "trimmed-mean",
        };
        write!(f, "{s}")
    }
}

/// Common contract every aggregator strategy satisfies: a non-empty list
/// of same-symbol quotes and an optional per-source weight map in, a
/// single consensus price out.
pub trait AggregatorStrategy {
    fn aggregate(
        &self,
        quotes: &[CanonicalQuote],
        weights_by_source: &HashMap<String, f64>,
    ) -> Result<f64, AggregatorError>;
}

/// Resolves the effective weight for a quote: an explicit per-quote weight
/// isn't part of `CanonicalQuote` in this core (quotes don't carry
/// per-instance weight overrides), so resolution is map lookup else 1.0.
fn effective_weight(quote: &CanonicalQuote, weights_by_source: &HashMap<String, f64>) -> f64 {
    weights_by_source
        .get(&quote.source.to_string())
        .copied()
        .unwrap_or(1.0)
}

pub struct WeightedMean;

impl AggregatorStrategy for WeightedMean {
    fn aggregate(
        &self,
        quotes: &[CanonicalQuote],
        weights_by_source: &HashMap<String, f64>,
    ) -> Result<f64, AggregatorError> {
        weighted_mean_of(quotes, weights_by_source)
    }
}

/// Shared weighted-mean computation, also used by `TrimmedMean`'s fallback
/// for small inputs and by its post-trim averaging step.
fn weighted_mean_of(
    quotes: &[CanonicalQuote],
    weights_by_source: &HashMap<String, f64>,
) -> Result<f64, AggregatorError> {
    if quotes.is_empty() {
        return Err(AggregatorError::EmptyInput);
    }
    let prices: Vec<f64> = quotes.iter().map(|q| q.price).collect();
    let weights: Vec<f64> = quotes
        .iter()
        .map(|q| effective_weight(q, weights_by_source))
        .collect();
    let (weighted, total_weight) = stats::weighted_sum(&prices, &weights);
    if total_weight == 0.0 {
        return Err(AggregatorError::ZeroTotalWeight);
    }
    Ok(weighted / total_weight)
}

pub struct Median;

impl AggregatorStrategy for Median {
    fn aggregate(
        &self,
        quotes: &[CanonicalQuote],
        _weights_by_source: &HashMap<String, f64>,
    ) -> Result<f64, AggregatorError> {
        if quotes.is_empty() {
            return Err(AggregatorError::EmptyInput);
        }
        let prices: Vec<f64> = quotes.iter().map(|q| q.price).collect();
        Ok(stats::median(&prices).expect("non-empty checked above"))
    }
}

pub struct TrimmedMean {
    trim_fraction: f64,
}

impl TrimmedMean {
    /// Constructs a trimmed-mean strategy bound to `trim_fraction`.
    /// Rejects values outside `[0, 0.5)` at construction, per the spec.
    pub fn new(trim_fraction: f64) -> Result<Self, AggregatorError> {
        if !(0.0..0.5).contains(&trim_fraction) {
            return Err(AggregatorError::InvalidTrimFraction(trim_fraction));
        }
        Ok(Self { trim_fraction })
    }
}

impl AggregatorStrategy for TrimmedMean {
    fn aggregate(
        &self,
        quotes: &[CanonicalQuote],
        weights_by_source: &HashMap<String, f64>,
    ) -> Result<f64, AggregatorError> {
        if quotes.is_empty() {
            return Err(AggregatorError::EmptyInput);
        }
        if quotes.len() < 3 {
            return weighted_mean_of(quotes, weights_by_source);
        }

        let mut indexed: Vec<&CanonicalQuote> = quotes.iter().collect();
        indexed.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .expect("prices must be finite")
        });

        let k = ((indexed.len() as f64) * self.trim_fraction).floor() as usize;
        let remainder: Vec<CanonicalQuote> = indexed[k..indexed.len() - k]
            .iter()
            .map(|q| (*q).clone())
            .collect();
        weighted_mean_of(&remainder, weights_by_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::normalizer::{AuditInfo, CanonicalSource};
    use chrono::Utc;

    fn quote(price: f64, source: CanonicalSource) -> CanonicalQuote {
        CanonicalQuote {
            symbol: "AAPL".to_string(),
            price,
            iso_timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            original_timestamp: 1_700_000_000_000,
            source,
            audit: AuditInfo {
                original_source: source.to_string(),
                original_symbol: "AAPL".to_string(),
                normalized_at: Utc::now(),
                normalizer_version: "test/1.0".to_string(),
                was_transformed: false,
                transformations: vec![],
            },
        }
    }

    #[test]
    fn weighted_mean_equal_weights() {
        let quotes = vec![
            quote(100.0, CanonicalSource::AlphaVantage),
            quote(102.0, CanonicalSource::Finnhub),
            quote(98.0, CanonicalSource::YahooFinance),
        ];
        let result = WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(result, 100.0);
    }

    #[test]
    fn weighted_mean_with_override() {
        let quotes = vec![
            quote(100.0, CanonicalSource::AlphaVantage),
            quote(110.0, CanonicalSource::Finnhub),
        ];
        let mut weights = HashMap::new();
        weights.insert("alpha_vantage".to_string(), 3.0);
        weights.insert("finnhub".to_string(), 1.0);
        let result = WeightedMean.aggregate(&quotes, &weights).unwrap();
        assert_eq!(result, 102.5);
    }

    #[test]
    fn weighted_mean_zero_total_weight_fails() {
        let quotes = vec![quote(100.0, CanonicalSource::Mock)];
        let mut weights = HashMap::new();
        weights.insert("mock".to_string(), 0.0);
        let err = WeightedMean.aggregate(&quotes, &weights).unwrap_err();
        assert_eq!(err, AggregatorError::ZeroTotalWeight);
    }

    #[test]
    fn weighted_mean_empty_input_fails() {
        let err = WeightedMean.aggregate(&[], &HashMap::new()).unwrap_err();
        assert_eq!(err, AggregatorError::EmptyInput);
    }

    #[test]
    fn median_protects_against_outlier() {
        let quotes = vec![
            quote(100.0, CanonicalSource::AlphaVantage),
            quote(101.0, CanonicalSource::Finnhub),
            quote(99.0, CanonicalSource::YahooFinance),
            quote(1000.0, CanonicalSource::Mock),
        ];
        let median_result = Median.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(median_result, 100.5);

        let weighted_result = WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(weighted_result, 325.0);
    }

    #[test]
    fn trimmed_mean_drops_one_from_each_tail() {
        let quotes = vec![
            quote(10.0, CanonicalSource::AlphaVantage),
            quote(98.0, CanonicalSource::Finnhub),
            quote(100.0, CanonicalSource::YahooFinance),
            quote(102.0, CanonicalSource::Mock),
            quote(500.0, CanonicalSource::Unknown),
        ];
        let strategy = TrimmedMean::new(0.20).unwrap();
        let result = strategy.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(result, 100.0);
    }

    #[test]
    fn trimmed_mean_falls_back_to_weighted_mean_below_three() {
        let quotes = vec![
            quote(100.0, CanonicalSource::AlphaVantage),
            quote(110.0, CanonicalSource::Finnhub),
        ];
        let strategy = TrimmedMean::new(0.20).unwrap();
        let trimmed_result = strategy.aggregate(&quotes, &HashMap::new()).unwrap();
        let weighted_result = WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(trimmed_result, weighted_result);
    }

    #[test]
    fn trimmed_mean_zero_equals_weighted_mean() {
        let quotes = vec![
            quote(10.0, CanonicalSource::AlphaVantage),
            quote(98.0, CanonicalSource::Finnhub),
            quote(100.0, CanonicalSource::YahooFinance),
            quote(102.0, CanonicalSource::Mock),
            quote(500.0, CanonicalSource::Unknown),
        ];
        let strategy = TrimmedMean::new(0.0).unwrap();
        let trimmed_result = strategy.aggregate(&quotes, &HashMap::new()).unwrap();
        let weighted_result = WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap();
        assert_eq!(trimmed_result, weighted_result);
    }

    #[test]
    fn trimmed_mean_rejects_out_of_range_fraction() {
        assert!(TrimmedMean::new(0.5).is_err());
        assert!(TrimmedMean::new(-0.1).is_err());
        assert!(TrimmedMean::new(0.49).is_ok());
    }

    #[test]
    fn single_element_input_yields_that_price_for_every_strategy() {
        let quotes = vec![quote(42.0, CanonicalSource::Mock)];
        assert_eq!(WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap(), 42.0);
        assert_eq!(Median.aggregate(&quotes, &HashMap::new()).unwrap(), 42.0);
        assert_eq!(
            TrimmedMean::new(0.2)
                .unwrap()
                .aggregate(&quotes, &HashMap::new())
                .unwrap(),
            42.0
        );
    }

    #[test]
    fn equal_prices_return_exactly_that_price_for_every_strategy() {
        let quotes: Vec<CanonicalQuote> = (0..5)
            .map(|_| quote(50.0, CanonicalSource::Mock))
            .collect();
        assert_eq!(WeightedMean.aggregate(&quotes, &HashMap::new()).unwrap(), 50.0);
        assert_eq!(Median.aggregate(&quotes, &HashMap::new()).unwrap(), 50.0);
        assert_eq!(
            TrimmedMean::new(0.2)
                .unwrap()
                .aggregate(&quotes, &HashMap::new())
                .unwrap(),
            50.0
        );
    }
}
