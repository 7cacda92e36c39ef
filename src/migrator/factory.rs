use super::file::MigrationFile;
use super::state::StateMigrator;
use super::{MigrationMetadata, Migrator, MigratorFactory, MigratorOption};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::tfexec::{ProcessExecutor, TerraformClient};
use std::path::PathBuf;

/// Loads migration files from the configured directory and runs them with
/// the real terraform binary.
#[derive(Debug, Clone, Default)]
pub struct FileMigratorFactory;

impl FileMigratorFactory {
    pub fn new() -> Self {
        Self
    }
}

impl MigratorFactory for FileMigratorFactory {
    fn new_migrator(
        &self,
        filename: &str,
        config: &MigrateConfig,
        option: &MigratorOption,
    ) -> Result<Box<dyn Migrator>> {
        let path = config.migration_dir.join(filename);
        let file = MigrationFile::load(&path, filename)?;
        let actions = file.state_actions(filename)?;

        let working_dir = file
            .migration
            .dir
            .clone()
            .or_else(|| option.working_dir.clone());
        let mut executor = ProcessExecutor::new();
        if let Some(dir) = &working_dir {
            executor = executor.with_working_dir(dir);
        }
        let tf = TerraformClient::new(executor)
            .with_exec_path(config.exec_path.clone())
            .with_working_dir(working_dir.unwrap_or_else(|| PathBuf::from(".")));

        let metadata = MigrationMetadata {
            kind: file.migration.kind,
            name: file.migration.name,
        };
        Ok(Box::new(
            StateMigrator::new(tf, metadata, actions)
                .with_plan_out(option.plan_out.clone())
                .with_init(option.init),
        ))
    }
}
