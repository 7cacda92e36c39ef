use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The only migration type this crate knows how to run.
pub const STATE_MIGRATION_TYPE: &str = "state";

/// Top-level shape of a migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationFile {
    pub migration: MigrationSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl MigrationFile {
    /// Read and parse the file at `path`; `filename` labels errors.
    pub fn load(path: &Path, filename: &str) -> Result<Self> {
        let bytes =
            fs::read(path).map_err(|err| Error::io(format!("read {}", path.display()), err))?;
        let file: MigrationFile =
            serde_json::from_slice(&bytes).map_err(|err| Error::Construction {
                filename: filename.to_string(),
                reason: err.to_string(),
            })?;
        Ok(file)
    }

    /// Check the type and parse every action.
    pub fn state_actions(&self, filename: &str) -> Result<Vec<StateAction>> {
        let construction = |reason: String| Error::Construction {
            filename: filename.to_string(),
            reason,
        };
        if self.migration.kind != STATE_MIGRATION_TYPE {
            return Err(construction(format!(
                "unknown migration type {:?}",
                self.migration.kind
            )));
        }
        if self.migration.actions.is_empty() {
            return Err(construction("migration has no actions".to_string()));
        }
        self.migration
            .actions
            .iter()
            .map(|line| StateAction::parse(line).map_err(&construction))
            .collect()
    }
}

/// One state-editing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    Mv {
        source: String,
        destination: String,
    },
    Rm {
        addresses: Vec<String>,
    },
    Import {
        address: String,
        id: String,
    },
}

impl StateAction {
    /// Parse `mv <src> <dst>`, `rm <addr>...`, or `import <addr> <id>`.
    ///
    /// Words are split with shell quoting rules so addresses like
    /// `aws_instance.web["a b"]` survive.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let words =
            shell_words::split(line).map_err(|err| format!("parse action {line:?}: {err}"))?;
        let Some((verb, rest)) = words.split_first() else {
            return Err("empty action".to_string());
        };
        match (verb.as_str(), rest) {
            ("mv", [source, destination]) => Ok(StateAction::Mv {
                source: source.clone(),
                destination: destination.clone(),
            }),
            ("rm", addresses) if !addresses.is_empty() => Ok(StateAction::Rm {
                addresses: addresses.to_vec(),
            }),
            ("import", [address, id]) => Ok(StateAction::Import {
                address: address.clone(),
                id: id.clone(),
            }),
            ("mv", _) => Err(format!("mv takes <source> <destination>: {line:?}")),
            ("rm", _) => Err(format!("rm takes at least one address: {line:?}")),
            ("import", _) => Err(format!("import takes <address> <id>: {line:?}")),
            (other, _) => Err(format!("unknown action {other:?}")),
        }
    }
}
