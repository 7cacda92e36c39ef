//! Terraform command wrapper.
//!
//! The terraform CLI has many side effects and its state subcommands disagree
//! on how they take input: some read state only from a file path. This module
//! hides that behind an in-memory request/response shape so callers never
//! manage temporary files themselves.
mod executor;
mod terraform;

pub use executor::{format_command_line, Executor, ProcessExecutor};
pub use terraform::{parse_version, State, TerraformCli, TerraformClient, DEFAULT_EXEC_PATH};
