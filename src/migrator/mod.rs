//! Single-migration runners.
//!
//! A migrator plans or applies exactly one migration file. The history-aware
//! runner only sees the [`Migrator`] and [`MigratorFactory`] traits.
mod factory;
mod file;
mod state;

use crate::config::MigrateConfig;
use crate::context::ExecContext;
use crate::error::Result;
use std::path::PathBuf;

pub use factory::FileMigratorFactory;
pub use file::{MigrationFile, MigrationSpec, StateAction, STATE_MIGRATION_TYPE};
pub use state::StateMigrator;

/// Declared type and name of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationMetadata {
    pub kind: String,
    pub name: String,
}

/// Options shared by every migrator built during one run.
#[derive(Debug, Clone, Default)]
pub struct MigratorOption {
    /// Write the state computed by a plan here instead of discarding it.
    pub plan_out: Option<PathBuf>,
    /// Run `terraform init` before touching state.
    pub init: bool,
    /// Working directory for terraform when the migration does not set one.
    pub working_dir: Option<PathBuf>,
}

pub trait Migrator {
    /// Dry run: compute the result without changing remote state.
    fn plan(&self, ctx: &ExecContext) -> Result<()>;

    fn apply(&self, ctx: &ExecContext) -> Result<()>;

    fn metadata(&self) -> &MigrationMetadata;
}

impl<M: Migrator + ?Sized> Migrator for Box<M> {
    fn plan(&self, ctx: &ExecContext) -> Result<()> {
        (**self).plan(ctx)
    }

    fn apply(&self, ctx: &ExecContext) -> Result<()> {
        (**self).apply(ctx)
    }

    fn metadata(&self) -> &MigrationMetadata {
        (**self).metadata()
    }
}

/// Builds the migrator for one migration file.
pub trait MigratorFactory {
    fn new_migrator(
        &self,
        filename: &str,
        config: &MigrateConfig,
        option: &MigratorOption,
    ) -> Result<Box<dyn Migrator>>;
}
