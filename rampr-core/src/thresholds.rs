use std::fmt;
use std::sync::Arc;

use rampr_metrics::{MetricKind, MetricSeriesSummary, MetricValue, Snapshot};
use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    /// Percentile in `[0, 100]`.
    P(f64),
}

impl ThresholdAgg {
    /// Whether this aggregation means anything for a metric of `kind`.
    #[must_use]
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count),
            MetricKind::Rate => matches!(self, Self::Rate | Self::Count),
            MetricKind::Trend => !matches!(self, Self::Rate),
        }
    }

    fn observe(self, values: &MetricValue) -> Option<f64> {
        match (values, self) {
            (MetricValue::Trend(t), Self::Avg) => t.avg,
            (MetricValue::Trend(t), Self::Min) => t.min,
            (MetricValue::Trend(t), Self::Max) => t.max,
            (MetricValue::Trend(t), Self::Med) => t.med,
            (MetricValue::Trend(t), Self::Count) => Some(t.count as f64),
            (MetricValue::Trend(t), Self::P(p)) => t.percentile(p),

            (MetricValue::Counter { total, .. }, Self::Count) => Some(*total as f64),

            (MetricValue::Rate { rate, .. }, Self::Rate) => *rate,
            (MetricValue::Rate { total, .. }, Self::Count) => Some(*total as f64),

            _ => None,
        }
    }
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

/// `<agg> <op> <number>`, e.g. `p(95)<500` or `rate < 0.05`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.agg, self.op.as_str(), self.value)
    }
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err("expected `<agg> <op> <number>`".to_string());
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !p.is_finite() || !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile {p} out of range [0, 100]"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value `{right}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

type PredicateFn = dyn Fn(&MetricValue) -> Option<bool> + Send + Sync;

#[derive(Clone)]
pub enum Predicate {
    Expr(ThresholdExpr),
    /// Arbitrary check over the final aggregate. `None` means "could not be decided".
    Custom(Arc<PredicateFn>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: String,
    pub predicate: Predicate,
    pub description: String,
}

impl Threshold {
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self> {
        let metric = metric.into();
        let expr = parse_threshold_expr(expression).map_err(|reason| Error::InvalidThreshold {
            metric: metric.clone(),
            expression: expression.to_string(),
            reason,
        })?;

        Ok(Self {
            metric,
            predicate: Predicate::Expr(expr),
            description: expression.trim().to_string(),
        })
    }

    pub fn custom<F>(metric: impl Into<String>, description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&MetricValue) -> Option<bool> + Send + Sync + 'static,
    {
        Self {
            metric: metric.into(),
            predicate: Predicate::Custom(Arc::new(check)),
            description: description.into(),
        }
    }

    /// Reject expressions whose aggregation cannot apply to the metric's kind.
    pub fn check_kind(&self, kind: MetricKind) -> Result<()> {
        if let Predicate::Expr(expr) = &self.predicate
            && !expr.agg.applies_to(kind)
        {
            return Err(Error::InvalidThreshold {
                metric: self.metric.clone(),
                expression: self.description.clone(),
                reason: format!("`{}` does not apply to a {kind} metric", expr.agg),
            });
        }
        Ok(())
    }

    fn judge(&self, series: &MetricSeriesSummary) -> (ThresholdStatus, Option<f64>) {
        match &self.predicate {
            Predicate::Expr(expr) => match expr.agg.observe(&series.values) {
                Some(v) if expr.op.apply(v, expr.value) => (ThresholdStatus::Pass, Some(v)),
                observed => (ThresholdStatus::Fail, observed),
            },
            Predicate::Custom(check) => match check(&series.values) {
                Some(true) => (ThresholdStatus::Pass, None),
                Some(false) => (ThresholdStatus::Fail, None),
                None => (ThresholdStatus::Indeterminate, None),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdStatus {
    Pass,
    Fail,
    /// No samples to judge; never fails the run.
    Indeterminate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub status: ThresholdStatus,
    pub observed: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl Evaluation {
    pub fn failed(&self) -> impl Iterator<Item = &ThresholdResult> + '_ {
        self.results
            .iter()
            .filter(|r| r.status == ThresholdStatus::Fail)
    }
}

/// Judge every threshold against the final aggregates.
///
/// A metric that is absent or has zero samples makes its thresholds indeterminate: absence of
/// traffic is not evidence of a violation.
pub fn evaluate(snapshot: &Snapshot, thresholds: &[Threshold]) -> Evaluation {
    let results: Vec<ThresholdResult> = thresholds
        .iter()
        .map(|t| {
            let (status, observed) = match snapshot.get(&t.metric) {
                Some(series) if series.sample_count() > 0 => t.judge(series),
                _ => (ThresholdStatus::Indeterminate, None),
            };
            ThresholdResult {
                metric: t.metric.clone(),
                expression: t.description.clone(),
                status,
                observed,
            }
        })
        .collect();

    let passed = results.iter().all(|r| r.status != ThresholdStatus::Fail);
    Evaluation { results, passed }
}
