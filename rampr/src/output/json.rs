use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config_path: &Path, _plan: &rampr_core::RunPlan) {}

    fn progress(&self) -> Option<rampr_core::ProgressFn> {
        Some(Arc::new(move |p: rampr_core::Progress| {
            emit_json_line(&build_progress_line(&p));
        }))
    }

    fn print_summary(&self, report: &rampr_core::Report) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            report,
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub elapsed_ms: u64,
    /// 1-based; absent once the last stage has ended.
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub stage_remaining_ms: Option<u64>,
    pub target: u64,
    pub live: u64,
    pub retiring: u64,
}

fn build_progress_line(p: &rampr_core::Progress) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        elapsed_ms: p.elapsed.as_millis() as u64,
        stage: p.stage.as_ref().map(|s| s.index + 1),
        stages: p.stage.as_ref().map(|s| s.count),
        stage_remaining_ms: p
            .stage
            .as_ref()
            .map(|s| s.stage_remaining.as_millis() as u64),
        target: p.target,
        live: p.live,
        retiring: p.retiring,
    }
}

#[derive(Debug, Serialize)]
struct JsonSummaryLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a rampr_core::Report,
}

pub(crate) fn report_json_pretty(report: &rampr_core::Report) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn progress_line_uses_one_based_stage_numbers() {
        let schedule = rampr_core::RampSchedule::new(
            0,
            vec![
                rampr_core::Stage::new(Duration::from_secs(10), 10),
                rampr_core::Stage::new(Duration::from_secs(10), 0),
            ],
        );
        let elapsed = Duration::from_secs(12);
        let line = build_progress_line(&rampr_core::Progress {
            elapsed,
            stage: schedule.stage_snapshot_at(elapsed),
            target: 8,
            live: 8,
            retiring: 2,
        });

        let v = serde_json::to_value(&line).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v["kind"], "progress");
        assert_eq!(v["elapsed_ms"], 12_000);
        assert_eq!(v["stage"], 2);
        assert_eq!(v["stages"], 2);
        assert_eq!(v["stage_remaining_ms"], 8_000);
        assert_eq!(v["retiring"], 2);
    }
}
