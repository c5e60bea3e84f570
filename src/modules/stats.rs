//! Pure statistical primitives shared by the aggregator strategies and the
//! confidence model. Nothing here touches I/O or time; every function is a
//! total function over a slice of `f64`.

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n-1 denominator) around a supplied mean.
/// Returns 0.0 for fewer than two values, matching the scoring model in
/// the aggregation engine where a single source has no dispersion.
pub fn variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    sum_sq / (values.len() - 1) as f64
}

/// Population standard deviation derived from `variance`.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    variance(values, mean).sqrt()
}

/// Sorted median. Odd count returns the middle element; even count returns
/// the mean of the two central elements. `values` is sorted internally via
/// a stable sort so equal-priced entries keep their relative order.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("prices must be finite"));
    let n = sorted.len();
    Some(if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    })
}

/// Weighted sum `Σ(value·weight)` paired with the total weight, so callers
/// can divide once and detect a zero denominator themselves.
pub fn weighted_sum(values: &[f64], weights: &[f64]) -> (f64, f64) {
    debug_assert_eq!(values.len(), weights.len());
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (v, w) in values.iter().zip(weights.iter()) {
        weighted += v * w;
        total_weight += w;
    }
    (weighted, total_weight)
}

/// Spread percent: `100 * (max - min) / mean`. Defined as 0.0 when mean is
/// zero, per the aggregation engine's contract (an Open Question the spec
/// flags; resolved here — see DESIGN.md).
pub fn spread_percent(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if mean == 0.0 {
        return 0.0;
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    100.0 * (max - min) / mean
}
