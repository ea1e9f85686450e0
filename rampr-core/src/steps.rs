use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rampr_metrics::{Collector, MetricKind, RateSample};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::probe::{OutcomeKind, ProbeRequest, RequestOutcome, ResponseSchema, StatusSet};
use crate::scenario::{Scenario, VuContext};
use crate::template::{JsonTemplate, Template, Vars};
use crate::{Error, Result};

pub const DEFAULT_CHECK_RATE: &str = "errors";

/// Per-step check rate name, e.g. `checks{step:login}`.
#[must_use]
pub fn check_metric_name(step: &str) -> String {
    format!("checks{{step:{step}}}")
}

/// Inverse of [`check_metric_name`].
#[must_use]
pub fn step_of_check_metric(name: &str) -> Option<&str> {
    name.strip_prefix("checks{step:")?.strip_suffix('}')
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThinkTime {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Uniform { min, max } if max > min => rng.gen_range(min..=max),
            Self::Uniform { min, .. } => min,
        }
    }
}

/// Bind a random element of the array variable `from` as `bind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub from: String,
    pub bind: String,
}

/// An application response the scenario accepts even though the probe classified it as an
/// error, e.g. 403 with `{"code": 6001}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tolerate {
    pub status: u16,
    pub pointer: Option<String>,
    pub equals: Option<Value>,
}

impl Tolerate {
    fn matches(&self, outcome: &RequestOutcome) -> bool {
        if outcome.status != Some(self.status) {
            return false;
        }
        let Some(pointer) = &self.pointer else {
            return true;
        };
        let Some(doc) = outcome.json() else {
            return false;
        };
        match (doc.pointer(pointer), &self.equals) {
            (Some(found), Some(expected)) => found == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as rendered.
    Text(Template),
    /// Rendered to a JSON value, then serialized.
    Json(JsonTemplate),
}

impl RequestBody {
    fn render(&self, vars: &Vars) -> Option<Bytes> {
        match self {
            Self::Text(t) => t.render(vars).map(Bytes::from),
            Self::Json(t) => serde_json::to_vec(&t.render(vars)?).ok().map(Bytes::from),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestStep {
    pub name: String,
    pub method: http::Method,
    pub path: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub expect_status: StatusSet,
    /// Decoded fields become iteration variables under their field names.
    pub schema: Option<Arc<ResponseSchema>>,
    pub requires: Vec<String>,
    pub pick: Option<Pick>,
    pub tolerate: Vec<Tolerate>,
    /// Run the step for this fraction of iterations only.
    pub probability: Option<f64>,
    /// Extra trend recorded next to `http_req_duration`.
    pub trend: Option<String>,
    /// Record into the scenario check rate.
    pub check: bool,
}

impl RequestStep {
    pub fn new(name: impl Into<String>, method: http::Method, path: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            method,
            path: Template::parse(path)?,
            headers: Vec::new(),
            body: None,
            timeout: None,
            expect_status: StatusSet::default(),
            schema: None,
            requires: Vec::new(),
            pick: None,
            tolerate: Vec::new(),
            probability: None,
            trend: None,
            check: true,
        })
    }

    pub fn get(name: impl Into<String>, path: &str) -> Result<Self> {
        Self::new(name, http::Method::GET, path)
    }

    pub fn post(name: impl Into<String>, path: &str, body: &Value) -> Result<Self> {
        Self::new(name, http::Method::POST, path)?.with_json(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: &str) -> Result<Self> {
        self.headers.push((name.into(), Template::parse(value)?));
        Ok(self)
    }

    pub fn with_body(mut self, body: &str) -> Result<Self> {
        self.body = Some(RequestBody::Text(Template::parse(body)?));
        Ok(self)
    }

    /// JSON body with placeholders in its string values; also sets `content-type`.
    pub fn with_json(mut self, doc: &Value) -> Result<Self> {
        self.body = Some(RequestBody::Json(JsonTemplate::parse(doc)?));
        self.with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn expecting(mut self, statuses: StatusSet) -> Self {
        self.expect_status = statuses;
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    #[must_use]
    pub fn requires(mut self, var: impl Into<String>) -> Self {
        self.requires.push(var.into());
        self
    }

    #[must_use]
    pub fn pick(mut self, from: impl Into<String>, bind: impl Into<String>) -> Self {
        self.pick = Some(Pick {
            from: from.into(),
            bind: bind.into(),
        });
        self
    }

    #[must_use]
    pub fn tolerate(mut self, rule: Tolerate) -> Self {
        self.tolerate.push(rule);
        self
    }

    #[must_use]
    pub fn with_probability(mut self, p: f64) -> Self {
        self.probability = Some(p);
        self
    }

    #[must_use]
    pub fn with_trend(mut self, name: impl Into<String>) -> Self {
        self.trend = Some(name.into());
        self
    }

    #[must_use]
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidStep {
            step: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("step name must not be empty".into()));
        }
        if let Some(p) = self.probability
            && !(0.0..=1.0).contains(&p)
        {
            return Err(invalid(format!("probability {p} is outside [0, 1]")));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("timeout must be positive".into()));
        }
        if let Some(pick) = &self.pick
            && (pick.from.is_empty() || pick.bind.is_empty())
        {
            return Err(invalid("pick needs both `from` and `as`".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Request(Box<RequestStep>),
    Pause(ThinkTime),
}

impl From<RequestStep> for Step {
    fn from(step: RequestStep) -> Self {
        Self::Request(Box::new(step))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Precondition not met, or the rendered request cannot be built; nothing was sent or
    /// recorded.
    Skipped,
    Success,
    /// Probe reported an error, but a tolerate rule accepted the response.
    Tolerated,
    Failed(OutcomeKind),
}

impl StepStatus {
    #[must_use]
    pub fn check_passed(self) -> Option<bool> {
        match self {
            Self::Skipped => None,
            Self::Success | Self::Tolerated => Some(true),
            Self::Failed(_) => Some(false),
        }
    }
}

/// Declarative scenario: an ordered list of request and pause steps sharing per-iteration
/// variables.
#[derive(Debug, Clone)]
pub struct StepScenario {
    name: String,
    check_rate: String,
    data: Vars,
    steps: Vec<Step>,
}

impl StepScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_rate: DEFAULT_CHECK_RATE.to_string(),
            data: Vars::new(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_check_rate(mut self, name: impl Into<String>) -> Self {
        self.check_rate = name.into();
        self
    }

    /// Static variable visible to every iteration.
    #[must_use]
    pub fn with_data(mut self, name: impl Into<String>, value: Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    #[must_use]
    pub fn pause(self, think: ThinkTime) -> Self {
        self.step(Step::Pause(think))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_rate(&self) -> &str {
        &self.check_rate
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Reject duplicate step names and malformed steps.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            match step {
                Step::Request(req) => {
                    req.validate()?;
                    if !seen.insert(req.name.as_str()) {
                        return Err(Error::InvalidStep {
                            step: req.name.clone(),
                            reason: "duplicate step name".into(),
                        });
                    }
                }
                Step::Pause(ThinkTime::Uniform { min, max }) if min > max => {
                    return Err(Error::InvalidStep {
                        step: format!("pause {min:?}..{max:?}"),
                        reason: "min must not exceed max".into(),
                    });
                }
                Step::Pause(_) => {}
            }
        }
        Ok(())
    }

    /// One pass over every step; returns the status of each step in order.
    pub async fn run_once(&self, vu: &mut VuContext) -> Vec<StepStatus> {
        let mut vars = self.data.clone();
        let mut out = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let status = match step {
                Step::Pause(think) => {
                    let d = think.sample(&mut vu.rng);
                    if !d.is_zero() {
                        tokio::time::sleep(d).await;
                    }
                    continue;
                }
                Step::Request(req) => self.run_request(req, vu, &mut vars).await,
            };
            out.push(status);
        }
        out
    }

    async fn run_request(
        &self,
        step: &RequestStep,
        vu: &mut VuContext,
        vars: &mut Vars,
    ) -> StepStatus {
        if let Some(p) = step.probability
            && vu.rng.r#gen::<f64>() >= p
        {
            return StepStatus::Skipped;
        }

        if let Some(missing) = step.requires.iter().find(|v| !vars.contains_key(*v)) {
            tracing::trace!(step = %step.name, var = %missing, "step skipped: missing variable");
            return StepStatus::Skipped;
        }

        if let Some(pick) = &step.pick {
            let chosen = match vars.get(&pick.from) {
                Some(Value::Array(items)) => items.choose(&mut vu.rng).cloned(),
                _ => None,
            };
            let Some(chosen) = chosen else {
                tracing::trace!(step = %step.name, from = %pick.from, "step skipped: nothing to pick");
                return StepStatus::Skipped;
            };
            vars.insert(pick.bind.clone(), chosen);
        }

        let Some(req) = render_request(step, vu, vars) else {
            tracing::trace!(step = %step.name, "step skipped: unresolved template");
            return StepStatus::Skipped;
        };

        let mut metrics = vu.metrics.probe_metrics();
        if let Some(trend) = &step.trend {
            match vu.trend(trend) {
                Ok(h) => metrics = metrics.with_latency(h),
                Err(err) => tracing::warn!(step = %step.name, error = %err, "step trend unavailable"),
            }
        }

        let outcome = match vu.probe.execute(&req, &metrics).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!(
                    step = %step.name,
                    error = %err,
                    "step skipped: request cannot be sent"
                );
                return StepStatus::Skipped;
            }
        };

        let status = if outcome.is_success() {
            vars.extend(outcome.decoded.clone());
            StepStatus::Success
        } else if step.tolerate.iter().any(|t| t.matches(&outcome)) {
            StepStatus::Tolerated
        } else {
            tracing::debug!(
                step = %step.name,
                kind = %outcome.kind,
                status = ?outcome.status,
                error = outcome.error.as_deref().unwrap_or(""),
                "step failed"
            );
            StepStatus::Failed(outcome.kind)
        };

        if step.check {
            self.record_check(vu, &step.name, status);
        }
        status
    }

    fn record_check(&self, vu: &VuContext, step: &str, status: StepStatus) {
        let Some(passed) = status.check_passed() else {
            return;
        };
        let sample = RateSample::from_success(passed);
        for name in [self.check_rate.clone(), check_metric_name(step)] {
            match vu.rate(&name) {
                Ok(h) => h.add_rate(sample),
                Err(err) => tracing::warn!(metric = %name, error = %err, "check not recorded"),
            }
        }
    }
}

fn render_request(step: &RequestStep, vu: &VuContext, vars: &Vars) -> Option<ProbeRequest> {
    let path = step.path.render_url(vars)?;
    let mut req = ProbeRequest::new(step.method.clone(), vu.url(&path))
        .expecting(step.expect_status.clone());

    for (name, value) in &step.headers {
        req = req.with_header(name.clone(), value.render(vars)?);
    }
    if let Some(body) = &step.body {
        req.body = body.render(vars)?;
    }
    if let Some(timeout) = step.timeout {
        req = req.with_timeout(timeout);
    }
    if let Some(schema) = &step.schema {
        req = req.with_schema(schema.clone());
    }
    Some(req)
}

impl Scenario for StepScenario {
    fn declare_metrics(&self, collector: &Collector) -> Result<()> {
        self.validate()?;

        collector.declare(&self.check_rate, MetricKind::Rate)?;
        for step in &self.steps {
            let Step::Request(req) = step else { continue };
            if let Some(trend) = &req.trend {
                collector.declare(trend, MetricKind::Trend)?;
            }
            if req.check {
                collector.declare(&check_metric_name(&req.name), MetricKind::Rate)?;
            }
        }
        Ok(())
    }

    async fn iteration(&self, vu: &mut VuContext) {
        self.run_once(vu).await;
    }
}
