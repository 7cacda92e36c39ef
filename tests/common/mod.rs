//! Shared test infrastructure for integration tests.
//!
//! A `Workspace` is a temp dir holding `.tfmig.json`, migration files, and a
//! fake `terraform` shell script whose remote state is a plain text file.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Appends one line per edit so tests can read back what was applied.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_TF_LOG"
case "$*" in
  *fail*) echo "Error: simulated failure" >&2; exit 1 ;;
esac
case "$1" in
  version)
    echo "Terraform v1.5.7"
    echo "on linux_amd64"
    ;;
  init)
    echo "Terraform has been initialized!"
    ;;
  state)
    case "$2" in
      pull) cat "$FAKE_TF_REMOTE" ;;
      push) cp "$3" "$FAKE_TF_REMOTE" ;;
      mv)
        file="${3#-state=}"
        echo "mv $4 $5" >> "$file"
        ;;
      rm)
        file="${3#-state=}"
        shift 3
        echo "rm $*" >> "$file"
        ;;
      *) echo "unknown state subcommand $2" >&2; exit 1 ;;
    esac
    ;;
  import)
    if ! ls ./*_override.tf >/dev/null 2>&1; then
      echo "Error: import would write through the configured backend" >&2
      exit 1
    fi
    for arg in "$@"; do
      case "$arg" in -state=*) file="${arg#-state=}" ;; esac
    done
    shift $(($# - 2))
    echo "import $1 $2" >> "$file"
    ;;
  *) echo "unknown command $1" >&2; exit 1 ;;
esac
"#;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create workspace");
        let workspace = Self { dir };
        let script = workspace.path().join("fake-terraform");
        fs::write(&script, FAKE_TERRAFORM).expect("write fake terraform");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("chmod fake terraform");
        fs::write(workspace.remote_path(), "initial\n").expect("write remote state");
        fs::create_dir_all(workspace.path().join("migrations")).expect("create migrations dir");
        let config = serde_json::json!({
            "migration_dir": "migrations",
            "history": {"storage": {"local": {"path": "history/history.json"}}},
            "exec_path": script,
            "timeout_seconds": 60,
        });
        fs::write(
            workspace.path().join(".tfmig.json"),
            serde_json::to_vec_pretty(&config).expect("serialize config"),
        )
        .expect("write config");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn remote_path(&self) -> PathBuf {
        self.path().join("remote.tfstate")
    }

    pub fn history_path(&self) -> PathBuf {
        self.path().join("history").join("history.json")
    }

    pub fn add_migration(&self, filename: &str, name: &str, actions: &[&str]) {
        let migration = serde_json::json!({
            "migration": {"type": "state", "name": name, "actions": actions}
        });
        fs::write(
            self.path().join("migrations").join(filename),
            serde_json::to_vec_pretty(&migration).expect("serialize migration"),
        )
        .expect("write migration");
    }

    pub fn remote(&self) -> String {
        fs::read_to_string(self.remote_path()).expect("read remote state")
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("terraform.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Backend override files left in the workspace.
    pub fn overrides(&self) -> Vec<PathBuf> {
        fs::read_dir(self.path())
            .expect("list workspace")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.to_string_lossy().ends_with("_override.tf"))
            .collect()
    }

    pub fn history(&self) -> serde_json::Value {
        let bytes = fs::read(self.history_path()).expect("read history");
        serde_json::from_slice(&bytes).expect("parse history")
    }

    pub fn tfmig(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_tfmig"))
            .args(args)
            .current_dir(self.path())
            .env("FAKE_TF_REMOTE", self.remote_path())
            .env("FAKE_TF_LOG", self.path().join("terraform.log"))
            .env_remove("TFMIG_EXEC_PATH")
            .output()
            .expect("run tfmig")
    }
}
