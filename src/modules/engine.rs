//! Aggregation Engine: orchestrates window filtering, validation, strategy
//! selection, weight resolution, confidence scoring, and emission of the
//! consensus record. Grounded in the teacher's `DataProcessor::
//! calculate_consensus`/`merge_normalized_sources` pipeline, restructured
//! around the three-strategy contract in `aggregator` and the windowed,
//! confidence-scored model the spec requires instead of the teacher's
//! fixed four-provider reliability table.
//!
//! The engine itself owns no mutable global state; every call is pure
//! apart from the explicit [`LastValueCache`] write in step 9 of
//! `aggregate`.

use crate::modules::aggregator::{
    AggregationMethod, AggregatorError, AggregatorStrategy, Median, TrimmedMean, WeightedMean,
};
use crate::modules::cache::LastValueCache;
use crate::modules::normalizer::CanonicalQuote;
use crate::modules::stats;
use crate::modules::weights::SourceWeightRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("aggregation requires at least one quote")]
    EmptyInput,
    #[error("min_sources must be at least 1, got {0}")]
    InvalidMinSources(usize),
    #[error("{supplied} quotes supplied, fewer than min_sources ({min_sources})")]
    InsufficientSources { supplied: usize, min_sources: usize },
    #[error("{survivors} quotes remain in the window, fewer than min_sources ({min_sources})")]
    InsufficientRecentSources { survivors: usize, min_sources: usize },
    #[error("quote for symbol '{found}' does not match requested symbol '{expected}'")]
    SymbolMismatch { expected: String, found: String },
    #[error("price must be finite and strictly positive, got {0}")]
    InvalidPriceValue(f64),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusMetrics {
    pub standard_deviation: f64,
    pub spread_percent: f64,
    pub source_count: usize,
    pub variance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusPrice {
    pub symbol: String,
    pub price: f64,
    pub method: AggregationMethod,
    pub confidence: f64,
    pub metrics: ConsensusMetrics,
    pub window_start: i64,
    pub window_end: i64,
    pub sources: Vec<String>,
    pub computed_at: i64,
}

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub min_sources: usize,
    pub window_millis: i64,
    pub method: AggregationMethod,
    pub trim_fraction: f64,
    pub source_weight_overrides: HashMap<String, f64>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            min_sources: 3,
            window_millis: 30_000,
            method: AggregationMethod::WeightedMean,
            trim_fraction: 0.20,
            source_weight_overrides: HashMap::new(),
        }
    }
}

/// Builds the concrete strategy for `options.method`, binding a fresh
/// `TrimmedMean` to `options.trim_fraction` when that method is selected.
fn select_strategy(
    options: &AggregationOptions,
) -> Result<Box<dyn AggregatorStrategy>, EngineError> {
    Ok(match options.method {
        AggregationMethod::WeightedMean => Box::new(WeightedMean),
        AggregationMethod::Median => Box::new(Median),
        AggregationMethod::TrimmedMean => Box::new(TrimmedMean::new(options.trim_fraction)?),
    })
}

/// Resolves, for every distinct source among `quotes`, the override if
/// present else the registry's weight.
fn resolve_weights(
    quotes: &[CanonicalQuote],
    registry: &SourceWeightRegistry,
    overrides: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    let mut resolved = HashMap::new();
    for quote in quotes {
        let source = quote.source.to_string();
        if resolved.contains_key(&source) {
            continue;
        }
        let weight = overrides
            .get(&source)
            .copied()
            .unwrap_or_else(|| registry.weight_of(&source));
        resolved.insert(source, weight);
    }
    resolved
}

/// `sourceScore = min(40, 10 + 3*sourceCount)`.
fn source_score(source_count: usize) -> f64 {
    (10.0 + 3.0 * source_count as f64).min(40.0)
}

/// `spreadScore = max(0, 30 - 3*spreadPercent)`.
fn spread_score(spread_percent: f64) -> f64 {
    (30.0 - 3.0 * spread_percent).max(0.0)
}

/// `stdDevScore = max(0, 30 - 0.3*stdDev)`.
fn std_dev_score(std_dev: f64) -> f64 {
    (30.0 - 0.3 * std_dev).max(0.0)
}

/// Deterministic confidence model: concave in source count, monotonic
/// non-increasing in spread and dispersion, clamped to `[0, 100]`.
fn confidence(source_count: usize, spread_pct: f64, std_dev: f64) -> f64 {
    let total = source_score(source_count) + spread_score(spread_pct) + std_dev_score(std_dev);
    total.clamp(0.0, 100.0)
}

/// Computes a single consensus price for `symbol` from `quotes`, writing
/// the result to `cache` on success. See §4.4 of the spec for the
/// ten-step algorithm this follows.
pub fn aggregate(
    symbol: &str,
    quotes: &[CanonicalQuote],
    options: &AggregationOptions,
    registry: &SourceWeightRegistry,
    cache: &LastValueCache,
) -> Result<ConsensusPrice, EngineError> {
    if symbol.trim().is_empty() {
        return Err(EngineError::EmptySymbol);
    }
    if quotes.is_empty() {
        return Err(EngineError::EmptyInput);
    }
    if options.min_sources == 0 {
        return Err(EngineError::InvalidMinSources(0));
    }
    if quotes.len() < options.min_sources {
        return Err(EngineError::InsufficientSources {
            supplied: quotes.len(),
            min_sources: options.min_sources,
        });
    }
    for quote in quotes {
        if quote.symbol != symbol {
            return Err(EngineError::SymbolMismatch {
                expected: symbol.to_string(),
                found: quote.symbol.clone(),
            });
        }
        if !quote.price.is_finite() || quote.price <= 0.0 {
            return Err(EngineError::InvalidPriceValue(quote.price));
        }
    }

    let now = Utc::now().timestamp_millis();
    let window_floor = now - options.window_millis;
    let survivors: Vec<CanonicalQuote> = quotes
        .iter()
        .filter(|q| q.original_timestamp >= window_floor)
        .cloned()
        .collect();
    if survivors.len() < options.min_sources {
        return Err(EngineError::InsufficientRecentSources {
            survivors: survivors.len(),
            min_sources: options.min_sources,
        });
    }

    let strategy = select_strategy(options)?;
    let weights = resolve_weights(&survivors, registry, &options.source_weight_overrides);
    let consensus_price = strategy.aggregate(&survivors, &weights)?;

    let prices: Vec<f64> = survivors.iter().map(|q| q.price).collect();
    let mean = stats::mean(&prices).expect("survivors non-empty, checked above");
    let variance = stats::variance(&prices, mean);
    let standard_deviation = stats::std_dev(&prices, mean);
    let spread_pct = stats::spread_percent(&prices, mean);

    let score = confidence(survivors.len(), spread_pct, standard_deviation);

    let window_start = survivors
        .iter()
        .map(|q| q.original_timestamp)
        .min()
        .expect("survivors non-empty");
    let window_end = survivors
        .iter()
        .map(|q| q.original_timestamp)
        .max()
        .expect("survivors non-empty");

    let mut sources: Vec<String> = survivors
        .iter()
        .map(|q| q.source.to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    sources.sort();

    let consensus = ConsensusPrice {
        symbol: symbol.to_string(),
        price: consensus_price,
        method: options.method,
        confidence: score,
        metrics: ConsensusMetrics {
            standard_deviation,
            spread_percent: spread_pct,
            source_count: survivors.len(),
            variance,
        },
        window_start,
        window_end,
        sources,
        computed_at: now,
    };

    cache.update(consensus.clone(), survivors);
    Ok(consensus)
}

/// Batch form over a symbol→quotes mapping. A failing symbol is logged and
/// omitted from the result; other symbols proceed, preserving forward
/// progress under partial failure.
pub fn aggregate_many(
    quotes_by_symbol: &HashMap<String, Vec<CanonicalQuote>>,
    options: &AggregationOptions,
    registry: &SourceWeightRegistry,
    cache: &LastValueCache,
) -> HashMap<String, ConsensusPrice> {
    let mut results = HashMap::with_capacity(quotes_by_symbol.len());
    for (symbol, quotes) in quotes_by_symbol {
        match aggregate(symbol, quotes, options, registry, cache) {
            Ok(consensus) => {
                results.insert(symbol.clone(), consensus);
            }
            Err(err) => {
                warn!(symbol = %symbol, error = %err, "aggregation failed for symbol, skipping");
            }
        }
    }
    results
}
