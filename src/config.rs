//! Global configuration loaded from `.tfmig.json`.
//!
//! Every field has a default so a project without a config file still runs
//! against `terraform` on PATH with history next to the migrations.
use crate::error::{Error, Result};
use crate::history::StorageConfig;
use crate::tfexec::DEFAULT_EXEC_PATH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = ".tfmig.json";

/// Overrides `exec_path` when set.
pub const EXEC_PATH_ENV: &str = "TFMIG_EXEC_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateConfig {
    #[serde(default = "default_migration_dir")]
    pub migration_dir: PathBuf,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default = "default_exec_path")]
    pub exec_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_migration_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_exec_path() -> String {
    DEFAULT_EXEC_PATH.to_string()
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migration_dir: default_migration_dir(),
            history: HistoryConfig::default(),
            exec_path: default_exec_path(),
            timeout_seconds: None,
        }
    }
}

impl MigrateConfig {
    /// Load from `path`, or the default file when `path` is `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let bytes = fs::read(&path)
            .map_err(|err| Error::io(format!("read config {}", path.display()), err))?;
        let config: MigrateConfig = serde_json::from_slice(&bytes)
            .map_err(|err| Error::json(format!("parse config {}", path.display()), err))?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(exec_path) = std::env::var(EXEC_PATH_ENV) {
            if !exec_path.trim().is_empty() {
                self.exec_path = exec_path;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration_dir.as_os_str().is_empty() {
            return Err(Error::Config("migration_dir must be non-empty".into()));
        }
        if self.exec_path.trim().is_empty() {
            return Err(Error::Config("exec_path must be non-empty".into()));
        }
        if self.timeout_seconds == Some(0) {
            return Err(Error::Config("timeout_seconds must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// History key for a migration file argument.
    ///
    /// A bare name or a path inside `migration_dir` maps to its file name;
    /// anything else is rejected since migrations are always loaded from
    /// `migration_dir`.
    pub fn migration_filename(&self, path: &Path) -> Result<String> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::Config(format!("invalid migration file path {}", path.display()))
            })?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !parent.as_os_str().is_empty() && !same_dir(parent, &self.migration_dir) {
            return Err(Error::Config(format!(
                "migration file {} is outside migration_dir {}",
                path.display(),
                self.migration_dir.display()
            )));
        }
        Ok(filename.to_string())
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (fs::canonicalize(a), fs::canonicalize(b)),
        (Ok(a), Ok(b)) if a == b
    )
}
