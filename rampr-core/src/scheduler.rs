use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scenario::{RunShared, Scenario};
use crate::schedule::{RampSchedule, StageSnapshot};
use crate::vu::{RetireFlag, run_vu};

#[derive(Debug, Clone)]
pub struct Progress {
    pub elapsed: Duration,
    pub stage: Option<StageSnapshot>,
    pub target: u64,
    /// Non-retiring tasks.
    pub live: u64,
    /// Retired tasks still finishing their current iteration.
    pub retiring: u64,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOutcome {
    /// Peak number of concurrently running tasks.
    pub vus_max: u64,
    pub spawned: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Stopped by the cancellation token before the last stage ended.
    pub interrupted: bool,
}

struct Slot {
    vu_id: u64,
    retire: Arc<RetireFlag>,
}

/// Task population. `live` holds non-retiring tasks in spawn order.
#[derive(Default)]
struct Pool {
    /// Each task yields the number of iterations its VU finished.
    tasks: JoinSet<u64>,
    slots: HashMap<Id, Slot>,
    live: Vec<Id>,
    next_vu_id: u64,
    outcome: SchedulerOutcome,
}

impl Pool {
    fn spawn<S: Scenario>(&mut self, scenario: &Arc<S>, shared: &RunShared) {
        self.next_vu_id += 1;
        let vu_id = self.next_vu_id;
        let retire = Arc::new(RetireFlag::default());

        let handle = self.tasks.spawn(run_vu(
            scenario.clone(),
            shared.vu_context(vu_id),
            retire.clone(),
        ));
        let id = handle.id();
        self.slots.insert(id, Slot { vu_id, retire });
        self.live.push(id);

        self.outcome.spawned += 1;
        self.outcome.vus_max = self.outcome.vus_max.max(self.slots.len() as u64);
    }

    /// Newest tasks retire first.
    fn retire_newest(&mut self, count: usize) {
        for _ in 0..count {
            let Some(id) = self.live.pop() else { break };
            if let Some(slot) = self.slots.get(&id) {
                slot.retire.retire();
            }
        }
    }

    fn retire_all(&mut self) {
        self.retire_newest(self.live.len());
    }

    fn settle(&mut self, res: Result<(Id, u64), JoinError>) {
        let (id, iterations) = match res {
            Ok((id, iterations)) => {
                self.outcome.completed += 1;
                (id, Some(iterations))
            }
            Err(err) => {
                if err.is_panic() {
                    tracing::warn!(error = %err, "virtual user panicked");
                }
                self.outcome.cancelled += 1;
                (err.id(), None)
            }
        };

        if let Some(slot) = self.slots.remove(&id) {
            tracing::trace!(vu = slot.vu_id, ?iterations, "virtual user finished");
        }
        self.live.retain(|live| *live != id);
    }

    fn reap(&mut self) {
        while let Some(res) = self.tasks.try_join_next_with_id() {
            self.settle(res);
        }
    }

    fn retiring(&self) -> u64 {
        self.slots.len().saturating_sub(self.live.len()) as u64
    }

    /// Wait up to `grace` for retired tasks, then abort whatever is left.
    async fn drain(&mut self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(res)) => self.settle(res),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        tracing::warn!(
            remaining = self.tasks.len(),
            grace = ?grace,
            "graceful stop elapsed, cancelling virtual users"
        );
        self.tasks.abort_all();
        while let Some(res) = self.tasks.join_next_with_id().await {
            self.settle(res);
        }
    }
}

/// Drives the number of live VU tasks toward the ramp target on a fixed tick.
pub struct RampScheduler<S> {
    schedule: RampSchedule,
    tick: Duration,
    graceful_stop: Duration,
    scenario: Arc<S>,
    shared: RunShared,
}

impl<S: Scenario> RampScheduler<S> {
    pub fn new(
        schedule: RampSchedule,
        tick: Duration,
        graceful_stop: Duration,
        scenario: Arc<S>,
        shared: RunShared,
    ) -> Self {
        Self {
            schedule,
            tick,
            graceful_stop,
            scenario,
            shared,
        }
    }

    pub async fn run(
        self,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> SchedulerOutcome {
        let mut pool = Pool::default();
        let started = Instant::now();

        let mut interval = tokio::time::interval(self.tick.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = cancel.cancelled() => {
                    tracing::info!("run interrupted, stopping virtual users");
                    pool.outcome.interrupted = true;
                    break;
                }
            }

            pool.reap();

            let elapsed = started.elapsed();
            if self.schedule.is_done(elapsed) {
                break;
            }

            let target = self.schedule.target_at(elapsed);
            let live = pool.live.len() as u64;
            if live < target {
                for _ in live..target {
                    pool.spawn(&self.scenario, &self.shared);
                }
            } else if live > target {
                pool.retire_newest((live - target) as usize);
            }

            if let Some(cb) = &progress {
                cb(Progress {
                    elapsed,
                    stage: self.schedule.stage_snapshot_at(elapsed),
                    target,
                    live: pool.live.len() as u64,
                    retiring: pool.retiring(),
                });
            }
        }

        pool.retire_all();
        tracing::debug!(retiring = pool.retiring(), "draining virtual users");
        if let Some(cb) = &progress {
            let elapsed = started.elapsed();
            cb(Progress {
                elapsed,
                stage: self.schedule.stage_snapshot_at(elapsed),
                target: 0,
                live: 0,
                retiring: pool.retiring(),
            });
        }

        if !pool.tasks.is_empty() {
            pool.drain(self.graceful_stop).await;
        }
        pool.outcome
    }
}
