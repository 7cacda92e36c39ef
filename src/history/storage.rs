use crate::context::ExecContext;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Where the serialized history lives.
pub trait Storage {
    /// Stored bytes, or an empty vec when nothing has been written yet.
    fn read(&self, ctx: &ExecContext) -> Result<Vec<u8>>;

    fn write(&self, ctx: &ExecContext, bytes: &[u8]) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn read(&self, ctx: &ExecContext) -> Result<Vec<u8>> {
        (**self).read(ctx)
    }

    fn write(&self, ctx: &ExecContext, bytes: &[u8]) -> Result<()> {
        (**self).write(ctx, bytes)
    }
}

/// Storage backend selection in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    Local { path: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: PathBuf::from(".tfmig_history.json"),
        }
    }
}

impl StorageConfig {
    /// Build the backend; relative paths resolve against `base_dir`.
    pub fn new_storage(&self, base_dir: &Path) -> Result<Box<dyn Storage>> {
        match self {
            StorageConfig::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config("history local path must be non-empty".into()));
                }
                Ok(Box::new(LocalStorage::new(base_dir.join(path))))
            }
        }
    }
}

/// History kept in a single file on local disk.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for LocalStorage {
    fn read(&self, _ctx: &ExecContext) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(Error::io(format!("read {}", self.path.display()), err)),
        }
    }

    /// Replace the file atomically so a crash never leaves half a history.
    ///
    /// Not subject to cancellation: a cancelled run still records what it applied.
    fn write(&self, _ctx: &ExecContext, bytes: &[u8]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .map_err(|err| Error::io(format!("create {}", parent.display()), err))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|err| Error::io(format!("create temp file in {}", parent.display()), err))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| Error::io(format!("write {}", self.path.display()), err))?;
        tmp.persist(&self.path)
            .map_err(|err| Error::io(format!("write {}", self.path.display()), err.error))?;
        Ok(())
    }
}
