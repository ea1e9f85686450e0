use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rampr_http::{HttpClient, HttpRequest};
use rampr_metrics::Collector;
use tokio_util::sync::CancellationToken;

use crate::config::{RunPlan, join_url};
use crate::probe::ProbeClient;
use crate::report::{Report, ReportParts};
use crate::scenario::{BuiltinMetrics, RunShared, Scenario};
use crate::schedule::RampSchedule;
use crate::scheduler::{ProgressFn, RampScheduler, SchedulerOutcome};
use crate::thresholds::evaluate;
use crate::{Error, Result};

/// What setup and teardown hooks can reach.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub base_url: String,
    pub http: HttpClient,
    pub seed: u64,
}

impl HookContext {
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

pub trait RunHooks: Send + Sync {
    /// An error aborts the run before any load is generated.
    fn setup(&self, ctx: &HookContext) -> impl Future<Output = Result<()>> + Send;

    /// Best effort; errors are logged and never change the verdict.
    fn teardown(&self, ctx: &HookContext) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RunHooks for NoHooks {
    async fn setup(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
}

/// `None` disables the hooks.
impl<H: RunHooks> RunHooks for Option<H> {
    async fn setup(&self, ctx: &HookContext) -> Result<()> {
        match self {
            Some(h) => h.setup(ctx).await,
            None => Ok(()),
        }
    }

    async fn teardown(&self, ctx: &HookContext) -> Result<()> {
        match self {
            Some(h) => h.teardown(ctx).await,
            None => Ok(()),
        }
    }
}

/// Default setup: `GET <base>/health` must answer the expected status.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub path: String,
    pub expect_status: u16,
    pub timeout: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            expect_status: 200,
            timeout: Duration::from_secs(10),
        }
    }
}

impl HealthCheck {
    #[must_use]
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl RunHooks for HealthCheck {
    async fn setup(&self, ctx: &HookContext) -> Result<()> {
        let url = ctx.url(&self.path);
        let req = HttpRequest::get(url.clone()).with_timeout(self.timeout);

        let res = ctx
            .http
            .request(req)
            .await
            .map_err(|e| Error::Setup(format!("health check {url} failed: {e}")))?;

        if res.status != self.expect_status {
            return Err(Error::Setup(format!(
                "health check {url} returned {} (expected {})",
                res.status, self.expect_status
            )));
        }

        tracing::info!(target_url = %url, status = res.status, "health check passed");
        Ok(())
    }

    async fn teardown(&self, ctx: &HookContext) -> Result<()> {
        tracing::info!(base_url = %ctx.base_url, "load test finished");
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RunOptions {
    pub progress: Option<ProgressFn>,
    /// Cancelling stops the ramp early; the drain and teardown still run.
    pub cancel: CancellationToken,
    /// Shared transport; a default client is built when unset.
    pub http: Option<HttpClient>,
}

/// Check everything that can be checked before the first request: stages, base url, scenario
/// definition and threshold/metric kinds.
pub fn prepare<S: Scenario>(
    plan: &RunPlan,
    scenario: &S,
) -> Result<(Arc<Collector>, BuiltinMetrics)> {
    plan.validate()?;

    let collector = Arc::new(Collector::new());
    let metrics = BuiltinMetrics::declare(&collector)?;
    scenario.declare_metrics(&collector)?;

    for t in &plan.thresholds {
        if let Some(kind) = collector.kind_of(&t.metric) {
            t.check_kind(kind)?;
        }
    }

    Ok((collector, metrics))
}

/// Setup, ramp-driven main phase, drain, teardown, threshold evaluation.
pub async fn run<S, H>(plan: &RunPlan, scenario: S, hooks: &H, opts: RunOptions) -> Result<Report>
where
    S: Scenario,
    H: RunHooks,
{
    let (collector, metrics) = prepare(plan, &scenario)?;

    let seed = plan.seed.unwrap_or_else(rand::random);
    let http = opts.http.unwrap_or_default();
    let hook_ctx = HookContext {
        base_url: plan.base_url.clone(),
        http: http.clone(),
        seed,
    };

    let started_at = SystemTime::now();
    let started = Instant::now();
    tracing::info!(
        base_url = %plan.base_url,
        stages = plan.stages.len(),
        duration = ?plan.total_duration(),
        max_vus = plan.max_vus(),
        seed,
        "run starting"
    );

    if let Err(err) = hooks.setup(&hook_ctx).await {
        tracing::error!(error = %err, "setup failed, run aborted");
        let snapshot = collector.freeze();
        let evaluation = evaluate(&snapshot, &plan.thresholds);
        return Ok(Report::new(
            ReportParts {
                started_at,
                ended_at: SystemTime::now(),
                duration: started.elapsed(),
                seed,
                vus_max: 0,
                iterations_interrupted: 0,
                interrupted: false,
                setup_error: Some(err.to_string()),
            },
            snapshot,
            evaluation,
        ));
    }

    let shared = RunShared {
        collector: collector.clone(),
        metrics: Arc::new(metrics),
        probe: ProbeClient::new(http),
        base_url: Arc::from(plan.base_url.as_str()),
        seed,
    };
    let scheduler = RampScheduler::new(
        RampSchedule::new(plan.start_vus, plan.stages.clone()),
        plan.tick,
        plan.graceful_stop,
        Arc::new(scenario),
        shared,
    );
    let outcome: SchedulerOutcome = scheduler.run(opts.cancel, opts.progress).await;
    tracing::info!(
        spawned = outcome.spawned,
        completed = outcome.completed,
        cancelled = outcome.cancelled,
        "virtual users drained"
    );

    if let Err(err) = hooks.teardown(&hook_ctx).await {
        tracing::warn!(error = %err, "teardown failed");
    }

    let snapshot = collector.freeze();
    let evaluation = evaluate(&snapshot, &plan.thresholds);
    for failed in evaluation.failed() {
        tracing::info!(
            metric = %failed.metric,
            expression = %failed.expression,
            observed = ?failed.observed,
            "threshold failed"
        );
    }

    Ok(Report::new(
        ReportParts {
            started_at,
            ended_at: SystemTime::now(),
            duration: started.elapsed(),
            seed,
            vus_max: outcome.vus_max,
            iterations_interrupted: outcome.cancelled,
            interrupted: outcome.interrupted,
            setup_error: None,
        },
        snapshot,
        evaluation,
    ))
}
