use super::record::{now_epoch_ms, History, Record};
use super::storage::Storage;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// History operations the runner depends on.
pub trait MigrationHistory {
    fn already_applied(&self, filename: &str) -> bool;

    /// Unapplied migration filenames in the order they must run.
    fn unapplied_migrations(&self) -> Vec<String>;

    fn history_length(&self) -> usize;

    /// Append a record. `None` lets the history stamp the current time.
    fn add_record(&mut self, filename: &str, kind: &str, name: &str, applied_at: Option<u128>);

    /// Persist the record set.
    fn save(&self, ctx: &ExecContext) -> Result<()>;
}

/// Tracks applied migrations for one migration directory.
pub struct Controller<S> {
    migration_dir: PathBuf,
    migrations: Vec<String>,
    history: History,
    storage: S,
}

impl<S: Storage> Controller<S> {
    /// Scan `migration_dir` and load the stored history.
    pub fn new(ctx: &ExecContext, migration_dir: &Path, storage: S) -> Result<Self> {
        let migrations = list_migrations(migration_dir)?;
        let bytes = storage.read(ctx)?;
        let history = History::parse(&bytes)?;
        tracing::debug!(
            migration_dir = %migration_dir.display(),
            migrations = migrations.len(),
            records = history.len(),
            "history loaded"
        );
        Ok(Self {
            migration_dir: migration_dir.to_path_buf(),
            migrations,
            history,
            storage,
        })
    }

    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    /// Every migration file found in the directory, in run order.
    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}

impl<S: Storage> MigrationHistory for Controller<S> {
    fn already_applied(&self, filename: &str) -> bool {
        self.history.contains(filename)
    }

    fn unapplied_migrations(&self) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|filename| !self.history.contains(filename))
            .cloned()
            .collect()
    }

    fn history_length(&self) -> usize {
        self.history.len()
    }

    fn add_record(&mut self, filename: &str, kind: &str, name: &str, applied_at: Option<u128>) {
        let record = Record {
            kind: kind.to_string(),
            name: name.to_string(),
            applied_at_epoch_ms: Some(applied_at.unwrap_or_else(now_epoch_ms)),
        };
        if !self.history.insert(filename, record) {
            tracing::warn!(filename, "history already has a record; keeping the original");
        }
    }

    fn save(&self, ctx: &ExecContext) -> Result<()> {
        let bytes = self.history.to_bytes()?;
        self.storage.write(ctx, &bytes)
    }
}

/// Migration filenames (`*.json`) directly under `dir`, sorted by name.
///
/// Hidden files are skipped so the config and a colocated history file are
/// never mistaken for migrations.
pub fn list_migrations(dir: &Path) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(dir).map_err(|err| Error::io(format!("read {}", dir.display()), err))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(format!("read {}", dir.display()), err))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(name) = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.starts_with('.'))
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
