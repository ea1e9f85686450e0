use std::time::{Duration, SystemTime};

use rampr_metrics::{MetricValue, Snapshot};
use serde::{Serialize, Serializer};

use crate::scenario::ITERATIONS;
use crate::steps::step_of_check_metric;
use crate::thresholds::{Evaluation, ThresholdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// At least one threshold failed.
    Fail,
    /// Setup failed; no load was generated.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub step: String,
    pub passes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub verdict: Verdict,
    #[serde(serialize_with = "rfc3339")]
    pub started_at: SystemTime,
    #[serde(serialize_with = "rfc3339")]
    pub ended_at: SystemTime,
    #[serde(rename = "duration_ms", serialize_with = "millis")]
    pub duration: Duration,
    pub seed: u64,
    pub vus_max: u64,
    pub iterations: u64,
    /// Iterations cut short by a hard stop.
    pub iterations_interrupted: u64,
    /// The run was stopped early by the caller.
    pub interrupted: bool,
    pub setup_error: Option<String>,
    pub metrics: Snapshot,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,
}

/// Inputs gathered by the runner; the derived fields are computed in [`Report::new`].
#[derive(Debug, Clone)]
pub struct ReportParts {
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub duration: Duration,
    pub seed: u64,
    pub vus_max: u64,
    pub iterations_interrupted: u64,
    pub interrupted: bool,
    pub setup_error: Option<String>,
}

impl Report {
    #[must_use]
    pub fn new(parts: ReportParts, metrics: Snapshot, evaluation: Evaluation) -> Self {
        let verdict = if parts.setup_error.is_some() {
            Verdict::Aborted
        } else if evaluation.passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        let iterations = match metrics.get(ITERATIONS).map(|s| &s.values) {
            Some(MetricValue::Counter { total, .. }) => *total,
            _ => 0,
        };

        Self {
            verdict,
            started_at: parts.started_at,
            ended_at: parts.ended_at,
            duration: parts.duration,
            seed: parts.seed,
            vus_max: parts.vus_max,
            iterations,
            iterations_interrupted: parts.iterations_interrupted,
            interrupted: parts.interrupted,
            setup_error: parts.setup_error,
            checks: check_summaries(&metrics),
            metrics,
            thresholds: evaluation.results,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

fn check_summaries(metrics: &Snapshot) -> Vec<CheckSummary> {
    metrics
        .iter()
        .filter_map(|series| {
            let step = step_of_check_metric(&series.name)?;
            let MetricValue::Rate {
                total, failures, ..
            } = series.values
            else {
                return None;
            };
            Some(CheckSummary {
                step: step.to_string(),
                passes: total.saturating_sub(failures),
                failures,
            })
        })
        .collect()
}

fn rfc3339<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&humantime::format_rfc3339_millis(*t))
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
