use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::scenario::{Scenario, VuContext};

/// Graceful stop signal, checked between iterations.
#[derive(Debug, Default)]
pub struct RetireFlag(AtomicBool);

impl RetireFlag {
    pub fn retire(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Iterate until retired and return the number of finished iterations. Iteration count and
/// duration also go to the builtin metrics.
///
/// A hard stop aborts the task instead, so the caller sees cancellation as a `JoinError`.
pub async fn run_vu<S: Scenario>(
    scenario: Arc<S>,
    mut vu: VuContext,
    retire: Arc<RetireFlag>,
) -> u64 {
    while !retire.is_retired() {
        let started = Instant::now();
        scenario.iteration(&mut vu).await;

        vu.metrics.iterations.add(1);
        vu.metrics
            .iteration_duration
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        vu.iteration += 1;

        // An iteration without suspension points would otherwise monopolize the worker.
        tokio::task::yield_now().await;
    }
    vu.iteration
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeClient;
    use crate::scenario::{BuiltinMetrics, ITERATIONS, RunShared};
    use rampr_metrics::Collector;
    use std::sync::atomic::AtomicU64;

    /// Retires its own VU once `limit` iterations have started.
    struct RetireAfter {
        limit: u64,
        started: AtomicU64,
        retire: Arc<RetireFlag>,
    }

    impl Scenario for RetireAfter {
        async fn iteration(&self, _vu: &mut VuContext) {
            if self.started.fetch_add(1, Ordering::Relaxed) + 1 >= self.limit {
                self.retire.retire();
            }
        }
    }

    #[tokio::test]
    async fn retired_vu_reports_its_finished_iterations() {
        let collector = Arc::new(Collector::new());
        let metrics = BuiltinMetrics::declare(&collector).unwrap_or_else(|e| panic!("{e}"));
        let shared = RunShared {
            collector: collector.clone(),
            metrics: Arc::new(metrics),
            probe: ProbeClient::default(),
            base_url: Arc::from("http://127.0.0.1:1/"),
            seed: 1,
        };

        let retire = Arc::new(RetireFlag::default());
        let scenario = Arc::new(RetireAfter {
            limit: 3,
            started: AtomicU64::new(0),
            retire: retire.clone(),
        });

        let done = run_vu(scenario, shared.vu_context(1), retire.clone()).await;
        assert_eq!(done, 3);
        assert!(retire.is_retired());

        let snap = collector.snapshot();
        let iterations = snap
            .get(ITERATIONS)
            .unwrap_or_else(|| panic!("missing {ITERATIONS}"));
        assert_eq!(iterations.sample_count(), 3);

        let already_retired = Arc::new(RetireFlag::default());
        already_retired.retire();
        let idle = Arc::new(RetireAfter {
            limit: 1,
            started: AtomicU64::new(0),
            retire: already_retired.clone(),
        });
        assert_eq!(run_vu(idle, shared.vu_context(2), already_retired).await, 0);
    }
}
