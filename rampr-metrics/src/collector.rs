use dashmap::DashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage, Sample};
use crate::{Error, Result};

/// Run-scoped metric registry.
///
/// Metrics are created on first reference. Writers of different metrics never contend; a trend
/// takes a short per-metric lock to append a sample.
#[derive(Debug, Default)]
pub struct Collector {
    metrics: DashMap<Arc<str>, Arc<MetricStorage>>,
    frozen: AtomicBool,
    final_snapshot: OnceLock<Snapshot>,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with zero samples so it shows up in snapshots even without traffic.
    pub fn declare(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        self.handle(name, kind)
    }

    pub fn handle(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        if name.is_empty() {
            return Err(Error::InvalidName);
        }
        if self.is_frozen() {
            return Err(Error::Frozen);
        }

        if let Some(entry) = self.metrics.get(name) {
            return Self::checked(entry.key(), entry.value(), kind);
        }

        let entry = self
            .metrics
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(MetricStorage::new(kind)));
        Self::checked(entry.key(), entry.value(), kind)
    }

    fn checked(
        name: &Arc<str>,
        storage: &Arc<MetricStorage>,
        kind: MetricKind,
    ) -> Result<MetricHandle> {
        let registered = storage.kind();
        if registered != kind {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                requested: kind,
            });
        }

        Ok(MetricHandle {
            name: name.clone(),
            storage: storage.clone(),
        })
    }

    /// Ingest one observation; the metric kind is inferred from the sample.
    pub fn record(&self, name: &str, sample: Sample) -> Result<()> {
        if let Sample::Trend(v) = sample
            && !v.is_finite()
        {
            return Err(Error::InvalidValue {
                name: name.to_string(),
                value: v,
            });
        }

        let handle = self.handle(name, sample.kind())?;
        handle.storage.apply(sample);
        Ok(())
    }

    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.get(name).map(|e| e.value().kind())
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Aggregate view. After [`Collector::freeze`] this always returns the final snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        if let Some(s) = self.final_snapshot.get() {
            return s.clone();
        }
        self.compute_snapshot()
    }

    /// Stop accepting samples and pin the authoritative snapshot.
    pub fn freeze(&self) -> Snapshot {
        self.frozen.store(true, Ordering::Release);
        self.final_snapshot
            .get_or_init(|| self.compute_snapshot())
            .clone()
    }

    fn compute_snapshot(&self) -> Snapshot {
        let mut series: Vec<MetricSeriesSummary> = self
            .metrics
            .iter()
            .map(|entry| MetricSeriesSummary {
                name: entry.key().to_string(),
                kind: entry.value().kind(),
                values: entry.value().summarize(),
            })
            .collect();

        series.sort_by(|a, b| a.name.cmp(&b.name));
        Snapshot { series }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    series: Vec<MetricSeriesSummary>,
}

impl Snapshot {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricSeriesSummary> {
        self.series
            .binary_search_by(|s| s.name.as_str().cmp(name))
            .ok()
            .and_then(|idx| self.series.get(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSeriesSummary> + '_ {
        self.series.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricValue, RateSample};

    #[test]
    fn record_creates_metric_on_first_reference() {
        let c = Collector::new();
        c.record("http_reqs", Sample::Counter(1))
            .unwrap_or_else(|e| panic!("{e}"));
        c.record("http_reqs", Sample::Counter(2))
            .unwrap_or_else(|e| panic!("{e}"));

        let snap = c.snapshot();
        let s = snap.get("http_reqs").unwrap_or_else(|| panic!("missing"));
        assert_eq!(s.kind, MetricKind::Counter);
        match s.values {
            MetricValue::Counter { total, samples } => {
                assert_eq!(total, 3);
                assert_eq!(samples, 2);
            }
            ref other => panic!("expected counter, got {other:?}"),
        }
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let c = Collector::new();
        c.record("errors", Sample::Rate(RateSample::Failure))
            .unwrap_or_else(|e| panic!("{e}"));

        let err = match c.record("errors", Sample::Trend(1.0)) {
            Ok(()) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            Error::KindMismatch {
                registered: MetricKind::Rate,
                requested: MetricKind::Trend,
                ..
            }
        ));
    }

    #[test]
    fn zero_sample_rate_reports_no_data() {
        let c = Collector::new();
        c.declare("http_req_failed", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let snap = c.snapshot();
        let s = snap
            .get("http_req_failed")
            .unwrap_or_else(|| panic!("missing"));
        assert_eq!(s.sample_count(), 0);
        match s.values {
            MetricValue::Rate { rate, .. } => assert!(rate.is_none()),
            ref other => panic!("expected rate, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_trend_values_are_rejected() {
        let c = Collector::new();
        assert!(c.record("lat", Sample::Trend(f64::NAN)).is_err());
        assert!(c.record("lat", Sample::Trend(f64::INFINITY)).is_err());
        assert!(c.snapshot().get("lat").is_none());
    }

    #[test]
    fn freeze_pins_the_final_snapshot() {
        let c = Collector::new();
        c.record("lat", Sample::Trend(10.0))
            .unwrap_or_else(|e| panic!("{e}"));

        let frozen = c.freeze();
        assert!(matches!(c.record("lat", Sample::Trend(20.0)), Err(Error::Frozen)));

        let again = c.snapshot();
        assert_eq!(frozen.len(), again.len());
        assert_eq!(
            again.get("lat").map(MetricSeriesSummary::sample_count),
            Some(1)
        );
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let c = Collector::new();
        for name in ["zeta", "alpha", "mid"] {
            c.record(name, Sample::Counter(1))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        let snap = c.snapshot();
        let names: Vec<&str> = snap.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn concurrent_writers_do_not_lose_samples() {
        let c = Arc::new(Collector::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let _ = c.record("lat", Sample::Trend((t * 1000 + i) as f64));
                        let _ = c.record(
                            "fail",
                            Sample::Rate(RateSample::from_success(i % 4 != 0)),
                        );
                    }
                })
            })
            .collect();
        for t in threads {
            let _ = t.join();
        }

        let snap = c.freeze();
        assert_eq!(
            snap.get("lat").map(MetricSeriesSummary::sample_count),
            Some(8000)
        );
        match snap.get("fail").map(|s| &s.values) {
            Some(MetricValue::Rate { rate, .. }) => assert_eq!(*rate, Some(0.25)),
            other => panic!("expected rate, got {other:?}"),
        }
    }
}
