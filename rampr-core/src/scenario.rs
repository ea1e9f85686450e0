use std::future::Future;
use std::sync::Arc;

use rampr_metrics::{Collector, MetricHandle, MetricKind};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::Result;
use crate::config::join_url;
use crate::probe::{ProbeClient, ProbeMetrics};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const DATA_RECEIVED: &str = "data_received";

/// Metrics every run declares up front, so they appear in reports even with zero samples.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    pub http_reqs: MetricHandle,
    pub http_req_duration: MetricHandle,
    pub http_req_failed: MetricHandle,
    pub iterations: MetricHandle,
    pub iteration_duration: MetricHandle,
    pub data_received: MetricHandle,
}

impl BuiltinMetrics {
    pub fn declare(collector: &Collector) -> Result<Self> {
        Ok(Self {
            http_reqs: collector.declare(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: collector.declare(HTTP_REQ_DURATION, MetricKind::Trend)?,
            http_req_failed: collector.declare(HTTP_REQ_FAILED, MetricKind::Rate)?,
            iterations: collector.declare(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: collector.declare(ITERATION_DURATION, MetricKind::Trend)?,
            data_received: collector.declare(DATA_RECEIVED, MetricKind::Counter)?,
        })
    }

    /// Probe sinks for a plain request: global latency trend and failure rate.
    #[must_use]
    pub fn probe_metrics(&self) -> ProbeMetrics {
        ProbeMetrics::new(self.http_req_duration.clone(), self.http_req_failed.clone())
            .with_requests(self.http_reqs.clone())
            .with_data_received(self.data_received.clone())
    }
}

/// Run-wide state every VU context is built from.
#[derive(Debug, Clone)]
pub struct RunShared {
    pub collector: Arc<Collector>,
    pub metrics: Arc<BuiltinMetrics>,
    pub probe: ProbeClient,
    pub base_url: Arc<str>,
    pub seed: u64,
}

impl RunShared {
    #[must_use]
    pub fn vu_context(&self, id: u64) -> VuContext {
        VuContext {
            id,
            iteration: 0,
            rng: StdRng::seed_from_u64(vu_seed(self.seed, id)),
            collector: self.collector.clone(),
            metrics: self.metrics.clone(),
            probe: self.probe.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// Per-VU RNG seed: stable for a given run seed and VU id.
#[must_use]
pub fn vu_seed(run_seed: u64, vu_id: u64) -> u64 {
    run_seed ^ vu_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// State owned by one virtual user for its whole life.
#[derive(Debug)]
pub struct VuContext {
    /// 1-based, unique within a run.
    pub id: u64,
    /// 0-based count of iterations this VU started.
    pub iteration: u64,
    pub rng: StdRng,
    pub collector: Arc<Collector>,
    pub metrics: Arc<BuiltinMetrics>,
    pub probe: ProbeClient,
    pub base_url: Arc<str>,
}

impl VuContext {
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub fn trend(&self, name: &str) -> Result<MetricHandle> {
        Ok(self.collector.handle(name, MetricKind::Trend)?)
    }

    pub fn rate(&self, name: &str) -> Result<MetricHandle> {
        Ok(self.collector.handle(name, MetricKind::Rate)?)
    }
}

/// One user journey. `iteration` is called repeatedly by a VU until it is retired.
pub trait Scenario: Send + Sync + 'static {
    /// Declare scenario metrics (zero samples) and validate the scenario against the collector.
    fn declare_metrics(&self, collector: &Collector) -> Result<()> {
        let _ = collector;
        Ok(())
    }

    /// Step failures become metric samples; an iteration never fails.
    fn iteration(&self, vu: &mut VuContext) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn shared(seed: u64) -> RunShared {
        let collector = Arc::new(Collector::new());
        let metrics = BuiltinMetrics::declare(&collector).unwrap_or_else(|e| panic!("{e}"));
        RunShared {
            collector,
            metrics: Arc::new(metrics),
            probe: ProbeClient::default(),
            base_url: Arc::from("http://127.0.0.1:1/"),
            seed,
        }
    }

    #[tokio::test]
    async fn vu_rng_is_reproducible_per_seed_and_id() {
        let a: Vec<u32> = {
            let mut vu = shared(7).vu_context(3);
            (0..8).map(|_| vu.rng.r#gen()).collect()
        };
        let b: Vec<u32> = {
            let mut vu = shared(7).vu_context(3);
            (0..8).map(|_| vu.rng.r#gen()).collect()
        };
        let c: Vec<u32> = {
            let mut vu = shared(7).vu_context(4);
            (0..8).map(|_| vu.rng.r#gen()).collect()
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn builtin_metrics_are_declared_with_zero_samples() {
        let s = shared(1);
        let snap = s.collector.snapshot();
        for name in [
            HTTP_REQS,
            HTTP_REQ_DURATION,
            HTTP_REQ_FAILED,
            ITERATIONS,
            ITERATION_DURATION,
            DATA_RECEIVED,
        ] {
            let series = snap
                .get(name)
                .unwrap_or_else(|| panic!("missing metric {name}"));
            assert_eq!(series.sample_count(), 0);
        }
        assert_eq!(s.vu_context(1).url("/health"), "http://127.0.0.1:1/health");
    }
}
