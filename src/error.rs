//! Error kinds surfaced by the runner, the Terraform wrapper, and history storage.
//!
//! Nothing here is retried. Callers decide what to do with each kind; the CLI
//! only distinguishes the history-inconsistent cases so it can warn louder.
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target filename is already recorded in history.
    #[error("a migration has already been applied: {filename}")]
    AlreadyApplied { filename: String },

    /// A migrator could not be built for a file.
    #[error("invalid migration {filename}: {reason}")]
    Construction { filename: String, reason: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The wrapped tool exited non-zero.
    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("command `{command}` was cancelled")]
    Cancelled { command: String },

    #[error("command `{command}` exceeded its deadline")]
    TimedOut { command: String },

    #[error("failed to parse terraform version: {stdout}")]
    VersionParse { stdout: String },

    /// Creating, writing, closing, or removing a temporary state file failed.
    #[error("failed to {action} temporary file: {source}")]
    TempFile {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported history version {0}")]
    HistoryVersion(u32),

    /// Every migration applied, but the history flush failed.
    #[error("apply succeeded, but failed to save history: {source}")]
    HistorySave {
        #[source]
        source: Box<Error>,
    },

    /// The history flush failed after an apply that had already failed.
    #[error("failed to save history: {save}, failed to apply: {apply}")]
    HistorySaveAfterFailure {
        save: Box<Error>,
        #[source]
        apply: Box<Error>,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn temp_file(action: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::TempFile { action, source }
    }

    /// True when remote state may have changed without a durable history record.
    pub fn is_history_inconsistent(&self) -> bool {
        matches!(
            self,
            Error::HistorySave { .. } | Error::HistorySaveAfterFailure { .. }
        )
    }
}
