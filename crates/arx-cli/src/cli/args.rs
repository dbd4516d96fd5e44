use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "arx",
    version,
    about = "Phase-orchestrated adversarial testing of AI-backed systems"
)]
pub struct Cli {
    /// Log output format (stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a scenario against its target, optionally resuming from a later phase
    Run(RunArgs),
    /// Check a scenario, its target and the configuration without running any phase
    Validate(ValidateArgs),
    /// Show the latest checkpoint of every phase of a scenario
    Status(StatusArgs),
    Version,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Scenario file (.json, .yaml, .yml)
    #[arg(long, short = 'f')]
    pub file: PathBuf,

    /// Resume from this phase (analysis|attack|report); earlier phases come from checkpoints
    #[arg(long)]
    pub start_from: Option<String>,

    /// Deliver the report's findings to the configured sink (REPORTER_TYPE)
    #[arg(long)]
    pub export_findings: bool,

    #[arg(long, default_value = ".arx/arx.db")]
    pub db: PathBuf,

    /// Max in-flight sub-tasks per phase (overrides ARX_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub skip_preflight: bool,

    /// Directory for report.json (overrides ARX_REPORT_DIR)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    #[arg(long, short = 'f')]
    pub file: PathBuf,

    /// Skip the findings sink connection test
    #[arg(long)]
    pub offline: bool,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    #[arg(long, short = 'f')]
    pub file: PathBuf,

    #[arg(long, default_value = ".arx/arx.db")]
    pub db: PathBuf,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}
