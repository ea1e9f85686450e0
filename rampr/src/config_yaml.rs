use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use rampr_core::{
    FieldType, HealthCheck, Method, RequestStep, ResponseSchema, RunPlan, Stage, StatusSet,
    StepScenario, ThinkTime, Threshold, Tolerate,
};
use serde::Deserialize;

use crate::run_error::RunError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RunFileYaml {
    #[serde(default)]
    base_url: Option<String>,

    #[serde(rename = "startVUs", default)]
    start_vus: Option<u64>,
    #[serde(default)]
    stages: Vec<StageYaml>,

    /// Constant-VU shorthand, used together with `duration` when `stages` is empty.
    #[serde(default)]
    vus: Option<u64>,
    #[serde(default)]
    duration: Option<YamlDuration>,

    #[serde(default)]
    tick: Option<YamlDuration>,
    #[serde(default)]
    graceful_stop: Option<YamlDuration>,
    #[serde(default)]
    seed: Option<u64>,

    #[serde(default)]
    setup: SetupYaml,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,

    scenario: ScenarioYaml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageYaml {
    target: u64,
    duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetupYaml {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    health_check: Option<String>,
    #[serde(default)]
    expect_status: Option<u16>,
    #[serde(default)]
    timeout: Option<YamlDuration>,
}

impl Default for SetupYaml {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check: None,
            expect_status: None,
            timeout: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScenarioYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    check_rate: Option<String>,
    /// Static variables visible to every iteration.
    #[serde(default)]
    data: BTreeMap<String, serde_yaml::Value>,
    steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepYaml {
    Pause(PauseStepYaml),
    Request(Box<RequestStepYaml>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PauseStepYaml {
    pause: PauseYaml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PauseYaml {
    Fixed(YamlDuration),
    Uniform { min: YamlDuration, max: YamlDuration },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RequestStepYaml {
    name: String,
    #[serde(default)]
    method: Option<String>,
    path: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Raw body template.
    #[serde(default)]
    body: Option<String>,
    /// Structured body, sent as JSON. String leaves may contain `{{var}}` templates.
    #[serde(default)]
    json: Option<serde_yaml::Value>,
    #[serde(default)]
    timeout: Option<YamlDuration>,
    #[serde(default)]
    expect_status: Vec<u16>,
    #[serde(default)]
    schema: BTreeMap<String, FieldYaml>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    pick: Option<PickYaml>,
    #[serde(default)]
    tolerate: Vec<TolerateYaml>,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(default)]
    trend: Option<String>,
    #[serde(default = "default_true")]
    check: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldYaml {
    /// JSON pointer; defaults to `/<field name>`.
    #[serde(default)]
    pointer: Option<String>,
    #[serde(rename = "type", default = "default_field_type")]
    ty: FieldType,
    #[serde(default)]
    optional: bool,
}

fn default_field_type() -> FieldType {
    FieldType::Any
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PickYaml {
    from: String,
    #[serde(rename = "as")]
    bind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TolerateYaml {
    status: u16,
    #[serde(default)]
    pointer: Option<String>,
    #[serde(default)]
    equals: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 30s, 1m), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Values that take precedence over the run file (CLI flags, then environment).
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub base_url: Option<String>,
    pub seed: Option<u64>,
    pub tick: Option<Duration>,
    pub graceful_stop: Option<Duration>,
}

#[derive(Debug, Clone)]
pub(crate) struct LoadedRun {
    pub plan: RunPlan,
    pub scenario: StepScenario,
    pub setup: Option<HealthCheck>,
}

pub(crate) async fn load_run_file(
    path: &Path,
    overrides: &Overrides,
) -> Result<LoadedRun, RunError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read run file: {}", path.display()))
        .map_err(RunError::InvalidInput)?;

    parse_run_file(&text, overrides)
        .map_err(|e| match e {
            RunError::InvalidInput(e) => {
                RunError::InvalidInput(e.context(format!("invalid run file: {}", path.display())))
            }
            other => other,
        })
}

pub(crate) fn parse_run_file(text: &str, overrides: &Overrides) -> Result<LoadedRun, RunError> {
    let doc: RunFileYaml = serde_yaml::from_str(text)
        .context("failed to parse YAML")
        .map_err(RunError::InvalidInput)?;

    let base_url = overrides
        .base_url
        .clone()
        .or(doc.base_url)
        .ok_or_else(|| {
            RunError::InvalidInput(anyhow!(
                "no base url: set `baseUrl`, RAMPR_BASE_URL or --base-url"
            ))
        })?;

    let mut plan = if !doc.stages.is_empty() {
        if doc.vus.is_some() || doc.duration.is_some() {
            return Err(RunError::InvalidInput(anyhow!(
                "`stages` cannot be combined with `vus`/`duration`"
            )));
        }
        let stages = doc
            .stages
            .iter()
            .map(|s| Stage::new(s.duration.into_inner(), s.target))
            .collect();
        RunPlan::new(base_url, stages).with_start_vus(doc.start_vus.unwrap_or(0))
    } else {
        match (doc.vus, doc.duration) {
            (Some(vus), Some(duration)) => RunPlan::constant(base_url, vus, duration.into_inner()),
            _ => {
                return Err(RunError::InvalidInput(anyhow!(
                    "either `stages` or both `vus` and `duration` are required"
                )));
            }
        }
    };

    if let Some(tick) = overrides.tick.or(doc.tick.map(YamlDuration::into_inner)) {
        plan = plan.with_tick(tick);
    }
    if let Some(grace) = overrides
        .graceful_stop
        .or(doc.graceful_stop.map(YamlDuration::into_inner))
    {
        plan = plan.with_graceful_stop(grace);
    }
    if let Some(seed) = overrides.seed.or(doc.seed) {
        plan = plan.with_seed(seed);
    }

    for (metric, exprs) in doc.thresholds {
        let exprs = match exprs {
            ThresholdExprYaml::One(s) => vec![s],
            ThresholdExprYaml::Many(v) => v,
        };
        for expr in exprs {
            plan = plan.with_threshold(Threshold::parse(metric.clone(), &expr)?);
        }
    }

    let setup = doc.setup.enabled.then(|| {
        let mut hc = HealthCheck::default();
        if let Some(path) = doc.setup.health_check {
            hc.path = path;
        }
        if let Some(status) = doc.setup.expect_status {
            hc.expect_status = status;
        }
        if let Some(timeout) = doc.setup.timeout {
            hc.timeout = timeout.into_inner();
        }
        hc
    });

    Ok(LoadedRun {
        plan,
        scenario: build_scenario(doc.scenario)?,
        setup,
    })
}

fn build_scenario(doc: ScenarioYaml) -> Result<StepScenario, RunError> {
    let mut scenario = StepScenario::new(doc.name.unwrap_or_else(|| "default".to_string()));
    if let Some(rate) = doc.check_rate {
        scenario = scenario.with_check_rate(rate);
    }
    for (name, value) in doc.data {
        scenario = scenario.with_data(name, to_json(&value)?);
    }

    for step in doc.steps {
        scenario = match step {
            StepYaml::Pause(p) => scenario.pause(match p.pause {
                PauseYaml::Fixed(d) => ThinkTime::Fixed(d.into_inner()),
                PauseYaml::Uniform { min, max } => ThinkTime::Uniform {
                    min: min.into_inner(),
                    max: max.into_inner(),
                },
            }),
            StepYaml::Request(r) => scenario.step(build_request_step(*r)?),
        };
    }
    Ok(scenario)
}

fn build_request_step(doc: RequestStepYaml) -> Result<RequestStep, RunError> {
    let method = match doc.method.as_deref() {
        None => Method::GET,
        Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
            .with_context(|| format!("step `{}`: invalid method `{m}`", doc.name))
            .map_err(RunError::InvalidInput)?,
    };

    let mut step = RequestStep::new(doc.name.clone(), method, &doc.path)?;

    match (doc.body, doc.json) {
        (Some(_), Some(_)) => {
            return Err(RunError::InvalidInput(anyhow!(
                "step `{}`: `body` and `json` are mutually exclusive",
                doc.name
            )));
        }
        (Some(body), None) => step = step.with_body(&body)?,
        (None, Some(json)) => step = step.with_json(&to_json(&json)?)?,
        (None, None) => {}
    }

    for (name, value) in &doc.headers {
        step = step.with_header(name.clone(), value)?;
    }
    if let Some(t) = doc.timeout {
        step = step.with_timeout(t.into_inner());
    }
    if !doc.expect_status.is_empty() {
        step = step.expecting(StatusSet::only(&doc.expect_status));
    }

    if !doc.schema.is_empty() {
        let mut schema = ResponseSchema::new();
        for (name, field) in &doc.schema {
            let pointer = field.pointer.clone().unwrap_or_else(|| format!("/{name}"));
            schema = if field.optional {
                schema.optional_field(name, &pointer, field.ty)
            } else {
                schema.field(name, &pointer, field.ty)
            };
        }
        step = step.with_schema(schema);
    }

    for var in doc.requires {
        step = step.requires(var);
    }
    if let Some(pick) = doc.pick {
        step = step.pick(pick.from, pick.bind);
    }
    for rule in doc.tolerate {
        step = step.tolerate(Tolerate {
            status: rule.status,
            pointer: rule.pointer,
            equals: rule.equals.as_ref().map(to_json).transpose()?,
        });
    }
    if let Some(p) = doc.probability {
        step = step.with_probability(p);
    }
    if let Some(trend) = doc.trend {
        step = step.with_trend(trend);
    }
    if !doc.check {
        step = step.unchecked();
    }
    Ok(step)
}

fn to_json(value: &serde_yaml::Value) -> Result<serde_json::Value, RunError> {
    serde_json::to_value(value)
        .context("value cannot be represented as JSON")
        .map_err(RunError::InvalidInput)
}
