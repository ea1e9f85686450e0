use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

mod duration;
mod format;
mod progress;
mod summary;

use duration::format_duration_single;
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
    total_ms: Arc<AtomicU64>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
            total_ms: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config_path: &Path, plan: &rampr_core::RunPlan) {
        self.total_ms
            .store(plan.total_duration().as_millis() as u64, Ordering::Relaxed);

        println!("run file: {}", config_path.display());
        println!("target: {}", plan.base_url);
        println!(
            "stages: {} duration={} max_vus={}",
            plan.stages.len(),
            format_duration_single(plan.total_duration()),
            plan.max_vus()
        );
        if !plan.thresholds.is_empty() {
            println!("thresholds: {}", plan.thresholds.len());
        }
        println!();
    }

    fn progress(&self) -> Option<rampr_core::ProgressFn> {
        let progress = self.progress.clone();
        let total_ms = self.total_ms.clone();

        Some(Arc::new(move |p: rampr_core::Progress| {
            let msg = match &p.stage {
                Some(stage) => format!(
                    "stage={}/{} target={} live={} retiring={} elapsed={} stage_remaining={}",
                    stage.index + 1,
                    stage.count,
                    p.target,
                    p.live,
                    p.retiring,
                    format_duration_single(p.elapsed),
                    format_duration_single(stage.stage_remaining),
                ),
                None => format!(
                    "target={} live={} retiring={} elapsed={}",
                    p.target,
                    p.live,
                    p.retiring,
                    format_duration_single(p.elapsed)
                ),
            };
            let total = match total_ms.load(Ordering::Relaxed) {
                0 => p.elapsed,
                ms => Duration::from_millis(ms),
            };
            progress.update(total, p.elapsed, msg);
        }))
    }

    fn print_summary(&self, report: &rampr_core::Report) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failed: Vec<_> = report
            .thresholds
            .iter()
            .filter(|t| t.status == rampr_core::ThresholdStatus::Fail)
            .collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no value)", t.metric, t.expression),
                }
            }
        }
        if let Some(err) = &report.setup_error {
            eprintln!("setup failed: {err}");
        }

        Ok(())
    }
}
