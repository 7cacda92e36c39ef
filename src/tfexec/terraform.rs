use super::executor::Executor;
use crate::context::ExecContext;
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::{NamedTempFile, TempPath};

/// Program name used when no explicit path is configured.
pub const DEFAULT_EXEC_PATH: &str = "terraform";

const STATE_FILE_NAME: &str = "terraform.tfstate";

/// Suffix terraform merges over the module's own `terraform` block.
const OVERRIDE_FILE_SUFFIX: &str = "_override.tf";

const LOCAL_BACKEND_OVERRIDE: &str = "terraform {\n  backend \"local\" {\n  }\n}\n";

/// Opaque tfstate contents. Never parsed, only moved between remote and temp files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State(Vec<u8>);

impl State {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for State {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for State {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// High-level terraform operations that work on in-memory state.
pub trait TerraformCli {
    /// Version number reported by `terraform version`.
    fn version(&self, ctx: &ExecContext) -> Result<String>;

    /// Current remote state.
    fn state_pull(&self, ctx: &ExecContext) -> Result<State>;

    /// Replace remote state with `state`.
    fn state_push(&self, ctx: &ExecContext, state: &State) -> Result<()>;

    /// Move `source` to `destination` within `state` and return the result.
    fn state_mv(
        &self,
        ctx: &ExecContext,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State>;

    /// Remove `addresses` from `state` and return the result.
    fn state_rm(&self, ctx: &ExecContext, state: &State, addresses: &[String]) -> Result<State>;

    /// Import an existing object `id` into `address` and return the result.
    ///
    /// Runs with the working dir forced onto the local backend, so a remote
    /// backend never sees the import.
    fn import(
        &self,
        ctx: &ExecContext,
        state: &State,
        address: &str,
        id: &str,
    ) -> Result<State>;

    /// Initialize the working directory so state subcommands can reach the backend.
    fn init(&self, ctx: &ExecContext) -> Result<()>;
}

/// `TerraformCli` implemented by running the terraform binary through an executor.
#[derive(Debug, Clone)]
pub struct TerraformClient<E> {
    executor: E,
    exec_path: String,
    /// Where terraform runs; backend override files are written here.
    working_dir: PathBuf,
}

impl<E: Executor> TerraformClient<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            exec_path: DEFAULT_EXEC_PATH.to_string(),
            working_dir: PathBuf::from("."),
        }
    }

    pub fn with_exec_path(mut self, exec_path: impl Into<String>) -> Self {
        self.exec_path = exec_path.into();
        self
    }

    /// Must match the executor's working dir.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn run(&self, ctx: &ExecContext, args: Vec<String>) -> Result<Vec<u8>> {
        self.executor.run(ctx, &self.exec_path, &args)
    }

    /// Run `f` while an override file pins the working dir to the local backend.
    ///
    /// `terraform import` goes through the configured backend and honors
    /// `-state=` only when that backend is local. The override is removed and
    /// the original backend re-initialized on every path; that restore step
    /// ignores cancellation.
    fn with_local_backend<T>(
        &self,
        ctx: &ExecContext,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let override_file = write_temp_file(
            &self.working_dir,
            OVERRIDE_FILE_SUFFIX,
            LOCAL_BACKEND_OVERRIDE.as_bytes(),
        )?;
        tracing::debug!(path = %override_file.display(), "local backend override written");
        let result = self.run(ctx, reconfigure_args()).and_then(|_| f());

        let removed = override_file.close();
        let restored = match &removed {
            Ok(()) => self.run(&ExecContext::background(), reconfigure_args()).map(drop),
            Err(_) => Ok(()),
        };
        if let Err(err) = &restored {
            tracing::error!(error = %err, "failed to restore the configured backend");
        }
        let value = result?;
        removed.map_err(Error::temp_file("remove"))?;
        restored?;
        Ok(value)
    }

    /// Run a subcommand that edits a local state file given via `-state=`.
    ///
    /// The file lives in its own temp dir so terraform's backup files go away
    /// with it.
    fn edit_state<F>(&self, ctx: &ExecContext, state: &State, build_args: F) -> Result<State>
    where
        F: FnOnce(String) -> Vec<String>,
    {
        let dir = tempfile::Builder::new()
            .prefix("tfmig")
            .tempdir()
            .map_err(Error::temp_file("create"))?;
        let path = dir.path().join(STATE_FILE_NAME);
        fs::write(&path, state.as_bytes()).map_err(Error::temp_file("write"))?;

        let state_flag = format!("-state={}", path_arg(&path)?);
        self.run(ctx, build_args(state_flag))?;

        let updated = fs::read(&path).map_err(Error::temp_file("read"))?;
        dir.close().map_err(Error::temp_file("remove"))?;
        Ok(State::new(updated))
    }
}

impl<E: Executor> TerraformCli for TerraformClient<E> {
    fn version(&self, ctx: &ExecContext) -> Result<String> {
        let stdout = self.run(ctx, args(["version"]))?;
        parse_version(&String::from_utf8_lossy(&stdout))
    }

    fn state_pull(&self, ctx: &ExecContext) -> Result<State> {
        let stdout = self.run(ctx, args(["state", "pull"]))?;
        Ok(State::new(stdout))
    }

    fn state_push(&self, ctx: &ExecContext, state: &State) -> Result<()> {
        let tmpfile = write_temp_file(&std::env::temp_dir(), ".tfstate", state.as_bytes())?;
        let result = path_arg(&tmpfile).and_then(|path| {
            let mut argv = args(["state", "push"]);
            argv.push(path);
            self.run(ctx, argv)
        });
        let removed = tmpfile.close();
        result?;
        removed.map_err(Error::temp_file("remove"))?;
        Ok(())
    }

    fn state_mv(
        &self,
        ctx: &ExecContext,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State> {
        self.edit_state(ctx, state, |state_flag| {
            let mut argv = args(["state", "mv"]);
            argv.push(state_flag);
            argv.push(source.to_string());
            argv.push(destination.to_string());
            argv
        })
    }

    fn state_rm(&self, ctx: &ExecContext, state: &State, addresses: &[String]) -> Result<State> {
        self.edit_state(ctx, state, |state_flag| {
            let mut argv = args(["state", "rm"]);
            argv.push(state_flag);
            argv.extend(addresses.iter().cloned());
            argv
        })
    }

    fn import(
        &self,
        ctx: &ExecContext,
        state: &State,
        address: &str,
        id: &str,
    ) -> Result<State> {
        self.with_local_backend(ctx, || {
            self.edit_state(ctx, state, |state_flag| {
                let mut argv = args(["import", "-input=false", "-no-color"]);
                argv.push(state_flag);
                argv.push(address.to_string());
                argv.push(id.to_string());
                argv
            })
        })
    }

    fn init(&self, ctx: &ExecContext) -> Result<()> {
        self.run(ctx, args(["init", "-input=false", "-no-color"]))?;
        Ok(())
    }
}

/// Extract `<version>` from `terraform version` output.
pub fn parse_version(stdout: &str) -> Result<String> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    let re = VERSION_RE.get_or_init(|| {
        Regex::new(r"(?m)^Terraform v(.+?)\s*$").expect("regex for terraform version")
    });
    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::VersionParse {
            stdout: stdout.to_string(),
        })
}

fn reconfigure_args() -> Vec<String> {
    args(["init", "-input=false", "-no-color", "-reconfigure"])
}

fn args<const N: usize>(words: [&str; N]) -> Vec<String> {
    words.iter().map(|word| word.to_string()).collect()
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        Error::TempFile {
            action: "name",
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("path is not valid UTF-8: {}", path.display()),
            ),
        }
    })
}

/// Write `content` to a fresh file in `dir`, closed before it is handed out.
///
/// The returned path deletes the file when dropped.
fn write_temp_file(dir: &Path, suffix: &str, content: &[u8]) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("tfmig")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(Error::temp_file("create"))?;
    file.write_all(content).map_err(Error::temp_file("write"))?;
    file.as_file()
        .sync_all()
        .map_err(Error::temp_file("close"))?;
    Ok(NamedTempFile::into_temp_path(file))
}

#[cfg(test)]
#[path = "terraform_tests.rs"]
mod tests;
