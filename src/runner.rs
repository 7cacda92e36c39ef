//! History-aware runner.
//!
//! Plans or applies either one named migration file or every unapplied file in
//! the migration directory, recording each successful apply in history.
//! History is written at most once per apply, and only when it changed.
use crate::config::MigrateConfig;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::history::{Controller, MigrationHistory, Storage};
use crate::migrator::{FileMigratorFactory, MigratorFactory, MigratorOption};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

pub struct HistoryRunner<H, F> {
    /// Set for file mode; `None` runs every unapplied migration.
    filename: Option<String>,
    config: MigrateConfig,
    option: MigratorOption,
    history: H,
    factory: F,
}

impl HistoryRunner<Controller<Box<dyn Storage>>, FileMigratorFactory> {
    /// Runner over the configured history storage and on-disk migration files.
    pub fn from_config(
        ctx: &ExecContext,
        filename: Option<String>,
        config: MigrateConfig,
        option: MigratorOption,
    ) -> Result<Self> {
        config.validate()?;
        let storage = config.history.storage.new_storage(Path::new("."))?;
        let history = Controller::new(ctx, &config.migration_dir, storage)?;
        Ok(Self::new(
            filename,
            config,
            option,
            history,
            FileMigratorFactory::new(),
        ))
    }
}

impl<H: MigrationHistory, F: MigratorFactory> HistoryRunner<H, F> {
    pub fn new(
        filename: Option<String>,
        config: MigrateConfig,
        option: MigratorOption,
        history: H,
        factory: F,
    ) -> Self {
        Self {
            filename,
            config,
            option,
            history,
            factory,
        }
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    /// Dry-run the named file, or every unapplied file in order.
    pub fn plan(&self, ctx: &ExecContext) -> Result<()> {
        match self.filename.as_deref() {
            Some(filename) => self.plan_file(ctx, filename),
            None => self.plan_dir(ctx),
        }
    }

    fn plan_file(&self, ctx: &ExecContext, filename: &str) -> Result<()> {
        if self.history.already_applied(filename) {
            return Err(Error::AlreadyApplied {
                filename: filename.to_string(),
            });
        }
        let migrator = self
            .factory
            .new_migrator(filename, &self.config, &self.option)
            .inspect_err(|_| tracing::error!(filename, "failed to plan"))?;
        migrator.plan(ctx)
    }

    fn plan_dir(&self, ctx: &ExecContext) -> Result<()> {
        let unapplied = self.history.unapplied_migrations();
        if unapplied.is_empty() {
            tracing::info!("no unapplied migrations");
            return Ok(());
        }
        tracing::info!(?unapplied, "unapplied migration files");
        for filename in &unapplied {
            ctx.check(&format!("plan {filename}"))?;
            self.plan_file(ctx, filename)?;
        }
        Ok(())
    }

    /// Apply the named file, or every unapplied file in order, then save
    /// history if any record was added.
    ///
    /// The save runs on every exit path, including a panicking migrator; the
    /// panic is resumed afterwards.
    pub fn apply(&mut self, ctx: &ExecContext) -> Result<()> {
        let before_len = self.history.history_length();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match self.filename.clone() {
            Some(filename) => self.apply_file(ctx, &filename),
            None => self.apply_dir(ctx),
        }));

        // Unchanged length: nothing was recorded, leave storage alone.
        let after_len = self.history.history_length();
        tracing::debug!(before_len, after_len, "length of history records");
        let saved = (before_len != after_len).then(|| self.save_history(ctx));

        match (outcome, saved) {
            (Ok(applied), saved) => compose_apply_result(applied, saved),
            (Err(payload), Some(Err(save))) => {
                let message = format!(
                    "{}; {}",
                    panic_message(payload.as_ref()),
                    Error::HistorySave {
                        source: Box::new(save),
                    }
                );
                tracing::error!(%message, "migration panicked; the history may be inconsistent");
                panic::resume_unwind(Box::new(message))
            }
            (Err(payload), _) => panic::resume_unwind(payload),
        }
    }

    fn apply_file(&mut self, ctx: &ExecContext, filename: &str) -> Result<()> {
        if self.history.already_applied(filename) {
            return Err(Error::AlreadyApplied {
                filename: filename.to_string(),
            });
        }
        let migrator = self
            .factory
            .new_migrator(filename, &self.config, &self.option)?;
        migrator
            .apply(ctx)
            .inspect_err(|_| tracing::error!(filename, "failed to apply"))?;

        let metadata = migrator.metadata();
        tracing::info!(
            filename,
            kind = %metadata.kind,
            name = %metadata.name,
            "add a record to history"
        );
        self.history
            .add_record(filename, &metadata.kind, &metadata.name, None);
        Ok(())
    }

    fn apply_dir(&mut self, ctx: &ExecContext) -> Result<()> {
        let unapplied = self.history.unapplied_migrations();
        if unapplied.is_empty() {
            tracing::info!("no unapplied migrations");
            return Ok(());
        }
        tracing::info!(?unapplied, "unapplied migration files");
        for filename in &unapplied {
            ctx.check(&format!("apply {filename}"))?;
            self.apply_file(ctx, filename)?;
        }
        Ok(())
    }

    fn save_history(&self, ctx: &ExecContext) -> Result<()> {
        tracing::info!("save history");
        match self.history.save(ctx) {
            Ok(()) => {
                tracing::info!("history saved");
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "failed to save history; the history may be inconsistent"
                );
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("migration panicked")
}

/// Fold the apply outcome and the optional save outcome into one result.
///
/// A save failure never hides an apply failure: both are kept.
fn compose_apply_result(applied: Result<()>, saved: Option<Result<()>>) -> Result<()> {
    match (applied, saved) {
        (applied, None | Some(Ok(()))) => applied,
        (Ok(()), Some(Err(save))) => Err(Error::HistorySave {
            source: Box::new(save),
        }),
        (Err(apply), Some(Err(save))) => Err(Error::HistorySaveAfterFailure {
            save: Box::new(save),
            apply: Box::new(apply),
        }),
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
