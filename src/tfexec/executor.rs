use crate::context::ExecContext;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs an external program and returns its stdout.
///
/// A non-zero exit is an error; implementations must honor cancellation and
/// the deadline carried by `ctx`.
pub trait Executor {
    fn run(&self, ctx: &ExecContext, program: &str, args: &[String]) -> Result<Vec<u8>>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn run(&self, ctx: &ExecContext, program: &str, args: &[String]) -> Result<Vec<u8>> {
        (**self).run(ctx, program, args)
    }
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl Executor for ProcessExecutor {
    fn run(&self, ctx: &ExecContext, program: &str, args: &[String]) -> Result<Vec<u8>> {
        let command_line = format_command_line(program, args);
        ctx.check(&command_line)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    reap(&mut child);
                    return Err(Error::io(format!("wait for `{command_line}`"), source));
                }
            }
            if ctx.is_cancelled() || ctx.is_expired() {
                reap(&mut child);
                tracing::warn!(command = %command_line, "command aborted");
                // Readers are left to finish on their own; a grandchild may
                // still hold the pipes open.
                return Err(if ctx.is_cancelled() {
                    Error::Cancelled {
                        command: command_line,
                    }
                } else {
                    Error::TimedOut {
                        command: command_line,
                    }
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout, "stdout", &command_line)?;
        let stderr = collect(stderr, "stderr", &command_line)?;
        let elapsed_ms = start.elapsed().as_millis();
        tracing::debug!(
            command = %command_line,
            elapsed_ms,
            stdout_bytes = stdout.len(),
            "command complete"
        );

        if !status.success() {
            return Err(Error::CommandFailed {
                command: command_line,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Kill `child` if it is still running and collect its exit status.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Render a program and its args for logs and error messages.
pub fn format_command_line(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend(args.iter().map(String::as_str));
    shell_words::join(parts)
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            reader.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(
    handle: JoinHandle<io::Result<Vec<u8>>>,
    stream: &str,
    command_line: &str,
) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => {
            result.map_err(|source| Error::io(format!("read {stream} of `{command_line}`"), source))
        }
        Err(_) => Err(Error::io(
            format!("read {stream} of `{command_line}`"),
            io::Error::other("reader thread panicked"),
        )),
    }
}
