use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::trend::summarize_trend;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

/// Outcome fed into a rate metric. The aggregate is always the failure ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSample {
    Success,
    Failure,
}

impl RateSample {
    #[must_use]
    pub fn from_success(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Failure }
    }

    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Counter(u64),
    Rate(RateSample),
    Trend(f64),
}

impl Sample {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub values: MetricValue,
}

impl MetricSeriesSummary {
    /// Number of observations behind this aggregate.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        match &self.values {
            MetricValue::Counter { samples, .. } => *samples,
            MetricValue::Rate { total, .. } => *total,
            MetricValue::Trend(t) => t.count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    Counter {
        total: u64,
        samples: u64,
    },
    Rate {
        total: u64,
        failures: u64,
        /// `failures / total`; `None` means no data.
        rate: Option<f64>,
    },
    Trend(TrendSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,

    #[serde(skip)]
    pub(crate) sorted: Arc<[f64]>,
}

impl TrendSummary {
    /// Nearest-rank percentile over every retained observation.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        crate::trend::nearest_rank(&self.sorted, p)
    }
}

#[derive(Debug)]
pub(crate) struct Rate {
    pub(crate) total: AtomicU64,
    pub(crate) failures: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct Counter {
    pub(crate) total: AtomicU64,
    pub(crate) samples: AtomicU64,
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Counter),
    Rate(Rate),
    Trend(Mutex<Vec<f64>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Counter {
                total: AtomicU64::new(0),
                samples: AtomicU64::new(0),
            }),
            MetricKind::Rate => Self::Rate(Rate {
                total: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            MetricKind::Trend => Self::Trend(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Caller guarantees the sample kind matches the storage kind.
    pub(crate) fn apply(&self, sample: Sample) {
        match (self, sample) {
            (Self::Counter(c), Sample::Counter(v)) => {
                c.total.fetch_add(v, Ordering::Relaxed);
                c.samples.fetch_add(1, Ordering::Relaxed);
            }
            (Self::Rate(r), Sample::Rate(s)) => {
                if s.is_failure() {
                    r.failures.fetch_add(1, Ordering::Relaxed);
                }
                r.total.fetch_add(1, Ordering::Relaxed);
            }
            (Self::Trend(t), Sample::Trend(v)) => t.lock().push(v),
            _ => {}
        }
    }

    pub(crate) fn summarize(&self) -> MetricValue {
        match self {
            Self::Counter(c) => MetricValue::Counter {
                total: c.total.load(Ordering::Relaxed),
                samples: c.samples.load(Ordering::Relaxed),
            },
            Self::Rate(r) => {
                // Read failures first so a concurrent writer can never make failures > total.
                let failures = r.failures.load(Ordering::Acquire);
                let total = r.total.load(Ordering::Acquire).max(failures);
                let rate = (total > 0).then(|| failures as f64 / total as f64);
                MetricValue::Rate {
                    total,
                    failures,
                    rate,
                }
            }
            Self::Trend(t) => {
                let samples = t.lock().clone();
                MetricValue::Trend(summarize_trend(samples))
            }
        }
    }
}

/// Cached write handle for a single metric, avoiding the name lookup on hot paths.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    pub(crate) name: Arc<str>,
    pub(crate) storage: Arc<MetricStorage>,
}

impl MetricHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.storage.kind()
    }

    #[inline]
    pub fn add(&self, value: u64) {
        self.storage.apply(Sample::Counter(value));
    }

    #[inline]
    pub fn add_rate(&self, sample: RateSample) {
        self.storage.apply(Sample::Rate(sample));
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if value.is_finite() {
            self.storage.apply(Sample::Trend(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_new_initializes_empty_values() {
        match MetricStorage::new(MetricKind::Rate).summarize() {
            MetricValue::Rate {
                total,
                failures,
                rate,
            } => {
                assert_eq!(total, 0);
                assert_eq!(failures, 0);
                assert!(rate.is_none());
            }
            other => panic!("expected rate, got {other:?}"),
        }

        match MetricStorage::new(MetricKind::Trend).summarize() {
            MetricValue::Trend(t) => {
                assert_eq!(t.count, 0);
                assert!(t.p95.is_none());
                assert!(t.avg.is_none());
            }
            other => panic!("expected trend, got {other:?}"),
        }
    }

    #[test]
    fn apply_ignores_mismatched_samples() {
        let s = MetricStorage::new(MetricKind::Counter);
        s.apply(Sample::Trend(1.0));
        s.apply(Sample::Counter(3));
        s.apply(Sample::Counter(4));

        match s.summarize() {
            MetricValue::Counter { total, samples } => {
                assert_eq!(total, 7);
                assert_eq!(samples, 2);
            }
            other => panic!("expected counter, got {other:?}"),
        }
    }

    #[test]
    fn rate_counts_failures_over_total() {
        let s = MetricStorage::new(MetricKind::Rate);
        s.apply(Sample::Rate(RateSample::Failure));
        s.apply(Sample::Rate(RateSample::Success));
        s.apply(Sample::Rate(RateSample::Success));
        s.apply(Sample::Rate(RateSample::Success));

        let MetricValue::Rate { rate, .. } = s.summarize() else {
            panic!("expected rate");
        };
        assert_eq!(rate, Some(0.25));
    }
}
