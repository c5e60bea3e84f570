//! Normalizer Registry & Canonical Record Builder.
//!
//! Every raw quote, regardless of which provider emitted it, is dispatched
//! to exactly one [`NormalizerKind`] and run through the shared
//! [`build_canonical_quote`] pipeline. The original design used an
//! abstract-base normalizer hierarchy; here the capability set
//! (`recognize`, `rewrite_symbol`, `version`, `canonical_source`) is carried
//! by a plain tagged enum and dispatched with a `match`, so there is no
//! virtual call and no shared mutable state between normalizers.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw, provider-native price record before normalization. Immutable once
/// constructed by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawQuote {
    pub symbol: String,
    pub price: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub source: String,
}

/// Canonical source identifier, carried on every normalized quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalSource {
    AlphaVantage,
    Finnhub,
    YahooFinance,
    Mock,
    Unknown,
}

impl std::fmt::Display for CanonicalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CanonicalSource::AlphaVantage => "alpha_vantage",
            CanonicalSource::Finnhub => "finnhub",
            CanonicalSource::YahooFinance => "yahoo_finance",
            CanonicalSource::Mock => "mock",
            CanonicalSource::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Audit trail recorded by the Canonical Record Builder for every quote it
/// emits, regardless of whether anything was actually rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditInfo {
    pub original_source: String,
    pub original_symbol: String,
    pub normalized_at: DateTime<Utc>,
    pub normalizer_version: String,
    pub was_transformed: bool,
    pub transformations: Vec<String>,
}

/// The internal, validated form of a quote. Read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalQuote {
    pub symbol: String,
    pub price: f64,
    pub iso_timestamp: String,
    pub original_timestamp: i64,
    pub source: CanonicalSource,
    pub audit: AuditInfo,
}

#[derive(Debug, Error)]
pub enum NormalizerError {
    #[error("validation failure: {0}")]
    ValidationFailure(String),
    #[error("no normalizer found for source '{0}'")]
    NoNormalizerFound(String),
}

/// A single failed item from a batch normalization, carrying enough
/// context to diagnose or re-drive it without losing the original record.
#[derive(Debug, Clone)]
pub struct NormalizationFailure {
    pub raw: RawQuote,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Tagged-variant capability set replacing the inheritance hierarchy the
/// original design used. Order in [`DISPATCH_ORDER`] is the dispatch
/// priority: the first variant whose `recognize` predicate matches wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizerKind {
    AlphaVantage,
    Finnhub,
    YahooFinance,
    Mock,
}

pub const DISPATCH_ORDER: [NormalizerKind; 4] = [
    NormalizerKind::AlphaVantage,
    NormalizerKind::Finnhub,
    NormalizerKind::YahooFinance,
    NormalizerKind::Mock,
];

static ALPHA_VANTAGE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(US|NYSE|NASDAQ|LSE|TSX|ASX|HK|LON)$").unwrap());
static FINNHUB_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(US|CRYPTO|FX|INDICES)-").unwrap());
static YAHOO_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\.(L|T|AX|HK|SI|KS|TW|NS|BO|TO|V|F|DE|PA|AS|BR|MC|MI|SW|CO|MX|SA|JK|KL)$",
    )
    .unwrap()
});

/// Strips whitespace, hyphens and underscores so recognition is robust to
/// `"Alpha Vantage"`, `"alpha-vantage"`, `"ALPHA_VANTAGE"`, etc.
fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase()
}

impl NormalizerKind {
    /// Case-insensitive substring match on the source field, after
    /// stripping whitespace/hyphens/underscores, against a fixed
    /// identifier list per variant.
    pub fn recognize(self, raw_source: &str) -> bool {
        let cleaned = normalize_identifier(raw_source);
        let identifiers: &[&str] = match self {
            NormalizerKind::AlphaVantage => &["alphavantage"],
            NormalizerKind::Finnhub => &["finnhub"],
            NormalizerKind::YahooFinance => &["yahoofinance", "yahoo"],
            NormalizerKind::Mock => &["mock"],
        };
        identifiers.iter().any(|id| cleaned.contains(id))
    }

    /// Rewrites the raw symbol per the variant's structural rule, then
    /// uniformly trims and uppercases the residual. Returns the rewritten
    /// symbol and whether a structural change occurred (used for the audit
    /// trail; case/whitespace-only changes still count as transformed).
    pub fn rewrite_symbol(self, raw_symbol: &str) -> (String, bool) {
        let trimmed = raw_symbol.trim();
        let structural = match self {
            NormalizerKind::AlphaVantage => ALPHA_VANTAGE_SUFFIX.replace(trimmed, "").into_owned(),
            NormalizerKind::Finnhub => FINNHUB_PREFIX.replace(trimmed, "").into_owned(),
            NormalizerKind::YahooFinance => {
                let stripped_caret = trimmed.strip_prefix('^').unwrap_or(trimmed);
                YAHOO_SUFFIX.replace(stripped_caret, "").into_owned()
            }
            NormalizerKind::Mock => trimmed.to_string(),
        };
        let rewritten = structural.trim().to_uppercase();
        let transformed = rewritten != raw_symbol;
        (rewritten, transformed)
    }

    pub fn version(self) -> &'static str {
        match self {
            NormalizerKind::AlphaVantage => "alpha-vantage-normalizer/1.0",
            NormalizerKind::Finnhub => "finnhub-normalizer/1.0",
            NormalizerKind::YahooFinance => "yahoo-finance-normalizer/1.0",
            NormalizerKind::Mock => "mock-normalizer/1.0",
        }
    }

    pub fn canonical_source(self) -> CanonicalSource {
        match self {
            NormalizerKind::AlphaVantage => CanonicalSource::AlphaVantage,
            NormalizerKind::Finnhub => CanonicalSource::Finnhub,
            NormalizerKind::YahooFinance => CanonicalSource::YahooFinance,
            NormalizerKind::Mock => CanonicalSource::Mock,
        }
    }
}

/// Picks the first [`NormalizerKind`] in [`DISPATCH_ORDER`] whose
/// `recognize` predicate matches `raw.source`.
pub fn dispatch(raw: &RawQuote) -> Result<NormalizerKind, NormalizerError> {
    DISPATCH_ORDER
        .into_iter()
        .find(|kind| kind.recognize(&raw.source))
        .ok_or_else(|| NormalizerError::NoNormalizerFound(raw.source.clone()))
}

/// Rounds to four decimal places, half-away-from-zero (as opposed to the
/// banker's rounding `f64::round` already gives us away from zero — this
/// wrapper exists purely to name the four-decimal contract in one place).
fn round_4dp(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

/// The shared validator and transformer invoked by every normalizer
/// variant. Runs the field-constraint checks, rewrites the symbol via the
/// chosen strategy, rounds the price, formats the timestamp, and records
/// audit metadata — in that order, per the spec.
pub fn build_canonical_quote(
    raw: &RawQuote,
    kind: NormalizerKind,
) -> Result<CanonicalQuote, NormalizerError> {
    let trimmed_symbol = raw.symbol.trim();
    let trimmed_source = raw.source.trim();
    if trimmed_symbol.is_empty() {
        return Err(NormalizerError::ValidationFailure(
            "symbol is empty".to_string(),
        ));
    }
    if trimmed_source.is_empty() {
        return Err(NormalizerError::ValidationFailure(
            "source is empty".to_string(),
        ));
    }
    if !raw.price.is_finite() || raw.price < 0.0 {
        return Err(NormalizerError::ValidationFailure(format!(
            "price must be finite and non-negative, got {}",
            raw.price
        )));
    }
    if raw.timestamp <= 0 {
        return Err(NormalizerError::ValidationFailure(format!(
            "timestamp must be a positive epoch millisecond value, got {}",
            raw.timestamp
        )));
    }

    let (rewritten_symbol, symbol_changed) = kind.rewrite_symbol(trimmed_symbol);
    let rounded_price = round_4dp(raw.price);
    let price_changed = (rounded_price - raw.price).abs() > f64::EPSILON;

    let iso_timestamp = DateTime::<Utc>::from_timestamp_millis(raw.timestamp)
        .ok_or_else(|| {
            NormalizerError::ValidationFailure(format!(
                "timestamp {} is not a valid epoch millisecond value",
                raw.timestamp
            ))
        })?
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut transformations = Vec::new();
    if symbol_changed {
        transformations.push(format!("symbol: {} -> {}", raw.symbol, rewritten_symbol));
    }
    if price_changed {
        transformations.push(format!("price: {} -> {}", raw.price, rounded_price));
    }

    Ok(CanonicalQuote {
        symbol: rewritten_symbol,
        price: rounded_price,
        iso_timestamp,
        original_timestamp: raw.timestamp,
        source: kind.canonical_source(),
        audit: AuditInfo {
            original_source: raw.source.clone(),
            original_symbol: raw.symbol.clone(),
            normalized_at: Utc::now(),
            normalizer_version: kind.version().to_string(),
            was_transformed: !transformations.is_empty(),
            transformations,
        },
    })
}

/// Dispatches and builds in one step: `normalize(raw) -> CanonicalQuote`.
pub fn normalize(raw: &RawQuote) -> Result<CanonicalQuote, NormalizerError> {
    let kind = dispatch(raw)?;
    build_canonical_quote(raw, kind)
}

/// Batch form: every raw quote is normalized independently; failures never
/// abort the batch. Returns `(successes, failures)`.
pub fn normalize_batch(raws: &[RawQuote]) -> (Vec<CanonicalQuote>, Vec<NormalizationFailure>) {
    let mut successes = Vec::with_capacity(raws.len());
    let mut failures = Vec::new();
    for raw in raws {
        match normalize(raw) {
            Ok(canonical) => successes.push(canonical),
            Err(err) => failures.push(NormalizationFailure {
                raw: raw.clone(),
                error: err.to_string(),
                failed_at: Utc::now(),
            }),
        }
    }
    (successes, failures)
}

/// Groups a successful batch by `canonical_source`, for callers that want
/// to report per-provider normalization yield.
pub fn group_by_canonical_source(
    quotes: Vec<CanonicalQuote>,
) -> std::collections::HashMap<CanonicalSource, Vec<CanonicalQuote>> {
    let mut grouped: std::collections::HashMap<CanonicalSource, Vec<CanonicalQuote>> =
        std::collections::HashMap::new();
    for quote in quotes {
        grouped.entry(quote.source).or_default().push(quote);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, price: f64, timestamp: i64, source: &str) -> RawQuote {
        RawQuote {
            symbol: symbol.to_string(),
            price,
            timestamp,
            source: source.to_string(),
        }
    }

    #[test]
    fn alpha_vantage_strips_exchange_suffix() {
        let q = normalize(&raw("AAPL.US", 100.0, 1_700_000_000_000, "AlphaVantage")).unwrap();
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.source, CanonicalSource::AlphaVantage);
    }

    #[test]
    fn finnhub_strips_leading_prefix() {
        let q = normalize(&raw("US-GOOGL", 100.0, 1_700_000_000_000, "finnhub")).unwrap();
        assert_eq!(q.symbol, "GOOGL");
    }

    #[test]
    fn yahoo_finance_strips_caret_and_suffix() {
        let q = normalize(&raw("^DJI", 100.0, 1_700_000_000_000, "Yahoo Finance")).unwrap();
        assert_eq!(q.symbol, "DJI");
    }

    #[test]
    fn mock_only_trims_and_uppercases() {
        let q = normalize(&raw("  aapl  ", 100.0, 1_700_000_000_000, "mock")).unwrap();
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.source, CanonicalSource::Mock);
    }

    #[test]
    fn unrecognized_source_fails() {
        let err = normalize(&raw("AAPL", 100.0, 1_700_000_000_000, "bloomberg")).unwrap_err();
        assert!(matches!(err, NormalizerError::NoNormalizerFound(_)));
    }

    #[test]
    fn negative_price_fails_validation() {
        let err = normalize(&raw("AAPL", -1.0, 1_700_000_000_000, "mock")).unwrap_err();
        assert!(matches!(err, NormalizerError::ValidationFailure(_)));
    }

    #[test]
    fn nan_price_fails_validation() {
        let err = normalize(&raw("AAPL", f64::NAN, 1_700_000_000_000, "mock")).unwrap_err();
        assert!(matches!(err, NormalizerError::ValidationFailure(_)));
    }

    #[test]
    fn non_positive_timestamp_fails_validation() {
        let err = normalize(&raw("AAPL", 1.0, 0, "mock")).unwrap_err();
        assert!(matches!(err, NormalizerError::ValidationFailure(_)));
    }

    #[test]
    fn price_rounds_to_four_decimals() {
        let q = normalize(&raw("AAPL", 100.123456, 1_700_000_000_000, "mock")).unwrap();
        assert_eq!(q.price, 100.1235);
    }

    #[test]
    fn iso_timestamp_round_trips_to_original() {
        let ts = 1_700_000_000_123;
        let q = normalize(&raw("AAPL", 100.0, ts, "mock")).unwrap();
        let parsed = DateTime::parse_from_rfc3339(&q.iso_timestamp).unwrap();
        assert_eq!(parsed.timestamp_millis(), ts);
        assert_eq!(q.original_timestamp, ts);
    }

    #[test]
    fn was_transformed_iff_transformations_nonempty() {
        let unchanged = normalize(&raw("AAPL", 100.0, 1_700_000_000_000, "mock")).unwrap();
        assert!(!unchanged.audit.was_transformed);
        assert!(unchanged.audit.transformations.is_empty());

        let changed = normalize(&raw("aapl", 100.0, 1_700_000_000_000, "mock")).unwrap();
        assert!(changed.audit.was_transformed);
        assert!(!changed.audit.transformations.is_empty());
    }

    #[test]
    fn normalize_is_idempotent_on_its_own_output() {
        let first = normalize(&raw("AAPL.US", 100.126, 1_700_000_000_000, "alphavantage")).unwrap();
        let reraw = raw(&first.symbol, first.price, first.original_timestamp, "alphavantage");
        let second = normalize(&reraw).unwrap();
        assert_eq!(first.symbol, second.symbol);
        assert_eq!(first.price, second.price);
    }

    #[test]
    fn batch_partitions_successes_and_failures() {
        let raws = vec![
            raw("AAPL", 100.0, 1_700_000_000_000, "mock"),
            raw("AAPL", -1.0, 1_700_000_000_000, "mock"),
            raw("AAPL", 100.0, 1_700_000_000_000, "unknown-provider"),
        ];
        let (successes, failures) = normalize_batch(&raws);
        assert_eq!(successes.len(), 1);
        assert_eq!(failures.len(), 2);
    }
}
