//! CLI argument parsing.
//!
//! The CLI stays thin: it loads config, builds a runner, and maps errors to
//! exit codes. All migration policy lives in the library.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "tfmig",
    version,
    about = "Apply Terraform state migrations exactly once, tracked in a history file",
    after_help = "Commands:\n  plan [FILE]      Dry-run one migration, or every unapplied migration\n  apply [FILE]     Apply one migration, or every unapplied migration, and record history\n  history          List migrations and whether they have been applied\n  version          Print the wrapped terraform version\n\nExamples:\n  tfmig plan\n  tfmig apply 20201012_mv_bucket.json\n  tfmig --config ci/.tfmig.json --timeout 900 apply\n  tfmig history --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every command.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Config file (defaults to .tfmig.json when present)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Deadline in seconds for the whole run
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Emit debug logs
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Plan(PlanArgs),
    Apply(ApplyArgs),
    History(HistoryArgs),
    /// Print the wrapped terraform version
    Version,
}

/// Plan command inputs.
#[derive(Parser, Debug)]
#[command(about = "Dry-run migrations without touching remote state or history")]
pub struct PlanArgs {
    /// Migration file in the migration dir; omit to plan every unapplied file
    #[arg(value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Write the planned state of a single migration to this path
    #[arg(long, value_name = "PATH", requires = "path")]
    pub out: Option<PathBuf>,

    /// Run `terraform init` before reading state
    #[arg(long)]
    pub init: bool,
}

/// Apply command inputs.
#[derive(Parser, Debug)]
#[command(about = "Apply migrations and record them in history")]
pub struct ApplyArgs {
    /// Migration file in the migration dir; omit to apply every unapplied file
    #[arg(value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Run `terraform init` before reading state
    #[arg(long)]
    pub init: bool,
}

/// History command inputs.
#[derive(Parser, Debug)]
#[command(about = "List migrations and their history records")]
pub struct HistoryArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}
