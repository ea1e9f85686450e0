use anyhow::Context as _;
use rampr_core::{CancellationToken, RunOptions};

use crate::cli::RunArgs;
use crate::config_yaml::{Overrides, load_run_file};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let overrides = Overrides {
        base_url: args.base_url.clone(),
        seed: args.seed,
        tick: args.tick,
        graceful_stop: args.graceful_stop,
    };
    let loaded = load_run_file(&args.config, &overrides).await?;

    let out = output::formatter(args.output);
    out.print_header(&args.config, &loaded.plan);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping the run");
            interrupt.cancel();
        }
    });

    let result = rampr_core::run(
        &loaded.plan,
        loaded.scenario,
        &loaded.setup,
        RunOptions {
            progress: out.progress(),
            cancel,
            http: None,
        },
    )
    .await;
    ctrl_c.abort();
    let report = result?;

    out.print_summary(&report).map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.json_out {
        let json = output::report_json_pretty(&report).map_err(RunError::RuntimeError)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write JSON report: {}", path.display()))
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_verdict(report.verdict))
}
