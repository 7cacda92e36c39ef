use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tfmig::cli::{ApplyArgs, Command, HistoryArgs, PlanArgs, RootArgs};
use tfmig::history::{Controller, MigrationHistory};
use tfmig::migrator::MigratorOption;
use tfmig::tfexec::{ProcessExecutor, TerraformCli, TerraformClient};
use tfmig::{ExecContext, HistoryRunner, MigrateConfig};
use tracing_subscriber::EnvFilter;

/// Log filter read before `RUST_LOG`.
const LOG_ENV: &str = "TFMIG_LOG";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let inconsistent = err
                .downcast_ref::<tfmig::Error>()
                .is_some_and(tfmig::Error::is_history_inconsistent);
            if inconsistent {
                eprintln!(
                    "warning: remote state may have been migrated without a durable history record; \
                     check the history file before running again"
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: RootArgs) -> Result<()> {
    let mut config = MigrateConfig::load(args.global.config.as_deref())
        .context("load config")?
        .with_env_overrides();
    if let Some(timeout) = args.global.timeout {
        config.timeout_seconds = Some(timeout);
    }
    config.validate()?;
    let ctx = match config.timeout() {
        Some(timeout) => ExecContext::with_timeout(timeout),
        None => ExecContext::background(),
    };

    match args.command {
        Command::Plan(plan) => cmd_plan(&ctx, config, plan),
        Command::Apply(apply) => cmd_apply(&ctx, config, apply),
        Command::History(history) => cmd_history(&ctx, &config, history),
        Command::Version => cmd_version(&ctx, &config),
    }
}

fn cmd_plan(ctx: &ExecContext, config: MigrateConfig, args: PlanArgs) -> Result<()> {
    resolve_exec_path(&config)?;
    let filename = args
        .path
        .as_deref()
        .map(|path| config.migration_filename(path))
        .transpose()?;
    let option = MigratorOption {
        plan_out: args.out,
        init: args.init,
        working_dir: None,
    };
    let runner = HistoryRunner::from_config(ctx, filename, config, option)?;
    runner.plan(ctx).context("plan migrations")?;
    println!("plan ok");
    Ok(())
}

fn cmd_apply(ctx: &ExecContext, config: MigrateConfig, args: ApplyArgs) -> Result<()> {
    resolve_exec_path(&config)?;
    let filename = args
        .path
        .as_deref()
        .map(|path| config.migration_filename(path))
        .transpose()?;
    let option = MigratorOption {
        init: args.init,
        ..MigratorOption::default()
    };
    let mut runner = HistoryRunner::from_config(ctx, filename, config, option)?;
    let before = runner.history().history_length();
    runner.apply(ctx).context("apply migrations")?;
    let applied = runner.history().history_length() - before;
    println!("applied {applied} migration(s)");
    Ok(())
}

fn cmd_history(ctx: &ExecContext, config: &MigrateConfig, args: HistoryArgs) -> Result<()> {
    let storage = config.history.storage.new_storage(Path::new("."))?;
    let controller = Controller::new(ctx, &config.migration_dir, storage)?;
    if args.json {
        let text = serde_json::to_string_pretty(controller.history())
            .context("serialize history")?;
        println!("{text}");
        return Ok(());
    }
    for filename in controller.migrations() {
        match controller.history().records.get(filename) {
            Some(record) => {
                let applied_at = record
                    .applied_at_epoch_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("applied  {applied_at:>13}  {filename}  {}", record.name);
            }
            None => println!("pending  {:>13}  {filename}", "-"),
        }
    }
    let orphaned = controller
        .history()
        .records
        .keys()
        .filter(|filename| !controller.migrations().contains(*filename))
        .count();
    if orphaned > 0 {
        eprintln!("note: {orphaned} history record(s) have no migration file");
    }
    tracing::debug!(
        unapplied = controller.unapplied_migrations().len(),
        "history listed"
    );
    Ok(())
}

fn cmd_version(ctx: &ExecContext, config: &MigrateConfig) -> Result<()> {
    let exec_path = resolve_exec_path(config)?;
    let tf = TerraformClient::new(ProcessExecutor::new())
        .with_exec_path(exec_path.to_string_lossy().into_owned());
    let version = tf.version(ctx).context("read terraform version")?;
    println!("{version}");
    Ok(())
}

fn resolve_exec_path(config: &MigrateConfig) -> Result<PathBuf> {
    which::which(&config.exec_path)
        .with_context(|| format!("locate terraform executable {:?}", config.exec_path))
}
