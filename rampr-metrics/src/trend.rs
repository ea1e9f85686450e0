use std::sync::Arc;

use crate::metrics::TrendSummary;

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// `rank = ceil(p / 100 * n)`, clamped to `[1, n]`; the result is always one of the observed
/// values. Returns `None` for an empty slice or a `p` outside `[0, 100]`.
#[must_use]
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }

    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    let idx = rank.clamp(1, n) - 1;
    sorted.get(idx).copied()
}

pub(crate) fn summarize_trend(mut samples: Vec<f64>) -> TrendSummary {
    samples.sort_unstable_by(f64::total_cmp);
    let sorted: Arc<[f64]> = Arc::from(samples);

    let count = sorted.len() as u64;
    // Summing the sorted values keeps the mean independent of insertion order.
    let avg = (count > 0).then(|| sorted.iter().sum::<f64>() / count as f64);

    TrendSummary {
        count,
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        avg,
        med: nearest_rank(&sorted, 50.0),
        p90: nearest_rank(&sorted, 90.0),
        p95: nearest_rank(&sorted, 95.0),
        p99: nearest_rank(&sorted, 99.0),
        sorted,
    }
}
