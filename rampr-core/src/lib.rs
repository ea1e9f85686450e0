//! Load generation engine: ramped virtual users running step scenarios against an HTTP API,
//! with metrics aggregation and threshold evaluation at the end of the run.

mod config;
mod error;
mod lifecycle;
mod probe;
mod report;
mod scenario;
mod schedule;
mod scheduler;
mod steps;
mod template;
mod thresholds;
mod vu;

pub use config::{RunPlan, Stage};
pub use error::{Error, Result};
pub use lifecycle::{HealthCheck, HookContext, NoHooks, RunHooks, RunOptions, prepare, run};
pub use probe::{
    Decoded, FieldSpec, FieldType, OutcomeKind, ProbeClient, ProbeMetrics, ProbeRequest,
    RequestOutcome, ResponseSchema, StatusSet,
};
pub use report::{CheckSummary, Report, ReportParts, Verdict};
pub use scenario::{
    BuiltinMetrics, DATA_RECEIVED, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, ITERATION_DURATION,
    ITERATIONS, RunShared, Scenario, VuContext, vu_seed,
};
pub use schedule::{RampSchedule, StageSnapshot};
pub use scheduler::{Progress, ProgressFn, RampScheduler, SchedulerOutcome};
pub use steps::{
    DEFAULT_CHECK_RATE, Pick, RequestBody, RequestStep, Step, StepScenario, StepStatus, ThinkTime,
    Tolerate, check_metric_name, step_of_check_metric,
};
pub use template::{JsonTemplate, Template, Vars};
pub use thresholds::{
    Evaluation, Predicate, Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdResult,
    ThresholdStatus, evaluate, parse_threshold_expr,
};
pub use vu::{RetireFlag, run_vu};

pub use http::Method;
pub use rampr_metrics as metrics;
pub use tokio_util::sync::CancellationToken;
