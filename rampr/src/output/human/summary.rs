use std::fmt::Write as _;

use rampr_core::metrics::{MetricSeriesSummary, MetricValue};
use rampr_core::{Report, ThresholdStatus, step_of_check_metric};

use super::duration::format_duration_single;
use super::format::*;

const NAME_WIDTH: usize = 28;

pub(crate) fn render(report: &Report) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(&mut out, "  verdict: {}", report.verdict).ok();
    writeln!(
        &mut out,
        "  duration: {}  seed: {}  vus_max: {}",
        format_duration_single(report.duration),
        report.seed,
        report.vus_max
    )
    .ok();

    let secs = report.duration.as_secs_f64().max(1e-9);
    writeln!(
        &mut out,
        "  iterations: {} ({}/s, interrupted {})",
        report.iterations,
        format_rate(report.iterations as f64 / secs),
        report.iterations_interrupted
    )
    .ok();
    if report.interrupted {
        out.push_str("  run was interrupted before the last stage ended\n");
    }
    if let Some(err) = &report.setup_error {
        writeln!(&mut out, "  setup failed: {err}").ok();
    }

    if !report.checks.is_empty() {
        out.push_str("\nchecks\n");
        for c in &report.checks {
            let total = c.passes + c.failures;
            let mark = if c.failures == 0 { "✓" } else { "✗" };
            writeln!(
                &mut out,
                "  {mark} {} passes={} failures={}{}",
                dotted(&c.step, NAME_WIDTH - 2),
                c.passes,
                c.failures,
                if total > 0 {
                    format!(" ({})", format_percent(c.passes as f64 / total as f64))
                } else {
                    String::new()
                }
            )
            .ok();
        }
    }

    out.push_str("\nmetrics\n");
    for series in report
        .metrics
        .iter()
        .filter(|s| step_of_check_metric(&s.name).is_none())
    {
        writeln!(
            &mut out,
            "  {} {}",
            dotted(&series.name, NAME_WIDTH),
            metric_line(series, secs)
        )
        .ok();
    }

    if !report.thresholds.is_empty() {
        out.push_str("\nthresholds\n");
        for t in &report.thresholds {
            let label = match t.status {
                ThresholdStatus::Pass => "PASS",
                ThresholdStatus::Fail => "FAIL",
                ThresholdStatus::Indeterminate => "N/A ",
            };
            let observed = match t.observed {
                Some(v) => format!("observed {v:.4}"),
                None if t.status == ThresholdStatus::Indeterminate => "no data".to_string(),
                None => "no value".to_string(),
            };
            writeln!(
                &mut out,
                "  {label} {} {} ({observed})",
                t.metric, t.expression
            )
            .ok();
        }
    }

    out
}

fn metric_line(series: &MetricSeriesSummary, secs: f64) -> String {
    match &series.values {
        MetricValue::Counter { total, .. } if series.name == rampr_core::DATA_RECEIVED => {
            format!(
                "{} ({}/s)",
                format_bytes(*total),
                format_bytes((*total as f64 / secs).round() as u64)
            )
        }
        MetricValue::Counter { total, .. } => {
            format!("{total} ({}/s)", format_rate(*total as f64 / secs))
        }
        MetricValue::Rate {
            total,
            failures,
            rate,
        } => match rate {
            Some(r) => format!("{} ({failures} of {total})", format_percent(*r)),
            None => "no data".to_string(),
        },
        MetricValue::Trend(t) if t.count == 0 => "no data".to_string(),
        MetricValue::Trend(t) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} (n={})",
            format_ms_opt(t.avg),
            format_ms_opt(t.min),
            format_ms_opt(t.med),
            format_ms_opt(t.max),
            format_ms_opt(t.p90),
            format_ms_opt(t.p95),
            format_ms_opt(t.p99),
            t.count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::metrics::{Collector, MetricKind, RateSample, Sample};
    use rampr_core::{ReportParts, Threshold, evaluate};
    use std::time::{Duration, SystemTime};

    fn report() -> Report {
        let c = Collector::new();
        for v in [10.0, 20.0, 30.0] {
            c.record("http_req_duration", Sample::Trend(v))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        c.record("http_req_failed", Sample::Rate(RateSample::Failure))
            .unwrap_or_else(|e| panic!("{e}"));
        c.record("checks{step:login}", Sample::Rate(RateSample::Success))
            .unwrap_or_else(|e| panic!("{e}"));
        c.declare("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let snap = c.freeze();
        let thresholds = vec![
            Threshold::parse("http_req_duration", "p(95)<500").unwrap_or_else(|e| panic!("{e}")),
            Threshold::parse("errors", "rate<0.05").unwrap_or_else(|e| panic!("{e}")),
        ];
        let eval = evaluate(&snap, &thresholds);
        Report::new(
            ReportParts {
                started_at: SystemTime::UNIX_EPOCH,
                ended_at: SystemTime::UNIX_EPOCH + Duration::from_secs(3),
                duration: Duration::from_secs(3),
                seed: 1,
                vus_max: 2,
                iterations_interrupted: 0,
                interrupted: false,
                setup_error: None,
            },
            snap,
            eval,
        )
    }

    #[test]
    fn renders_metrics_checks_and_thresholds() {
        let text = render(&report());

        assert!(text.contains("verdict: pass"), "{text}");
        assert!(text.contains("✓ login"), "{text}");
        assert!(text.contains("http_req_failed"), "{text}");
        assert!(text.contains("100.00% (1 of 1)"), "{text}");
        assert!(text.contains("med=20.00ms"), "{text}");
        assert!(text.contains("PASS http_req_duration p(95)<500"), "{text}");
        assert!(text.contains("N/A  errors rate<0.05 (no data)"), "{text}");
        assert!(!text.contains("checks{step:login}...."), "{text}");
    }
}
