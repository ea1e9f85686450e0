use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Bare numbers are seconds; otherwise any humantime duration (`250ms`, `1m 30s`).
fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}': {e} (expected e.g. 10s, 250ms, 1m)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and a summary table.
    HumanReadable,
    /// NDJSON progress lines followed by the JSON report, on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Ramped HTTP load generator with threshold gating",
    long_about = "rampr drives a time-varying number of virtual users through a multi-step HTTP scenario, aggregates latency and error metrics, and evaluates pass/fail thresholds when the run ends.\n\nA run file (YAML) describes stages, thresholds, the scenario and the setup check.",
    after_help = "Examples:\n  rampr run demos/smoke_test.yaml\n  rampr run demos/load_test.yaml --base-url http://localhost:8080\n  RAMPR_BASE_URL=http://staging:8080 rampr run demos/stress_test.yaml --output json\n\nExit codes: 0 pass, 11 thresholds failed, 21 setup failed, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a run file
    #[command(
        long_about = "Execute a run file: setup check, ramped main phase, drain, teardown and threshold evaluation.\n\nCLI flags override the environment, which overrides values from the run file."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the run file (.yaml)
    pub config: PathBuf,

    /// Base URL of the system under test
    #[arg(long, env = "RAMPR_BASE_URL")]
    pub base_url: Option<String>,

    /// RNG seed for reproducible think times and picks
    #[arg(long)]
    pub seed: Option<u64>,

    /// Scheduler tick (e.g. 100ms)
    #[arg(long, value_parser = parse_duration)]
    pub tick: Option<Duration>,

    /// How long retired users may finish their iteration before being cancelled
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long, value_name = "PATH")]
    pub json_out: Option<PathBuf>,
}
