//! History-aware Terraform state migrations.
//!
//! Migrations are applied at most once each. A persisted history records what
//! has run, and the terraform CLI is wrapped so state moves through memory
//! instead of through caller-managed temp files.
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod migrator;
pub mod runner;
pub mod tfexec;

pub use config::MigrateConfig;
pub use context::{CancellationToken, ExecContext};
pub use error::{Error, Result};
pub use runner::HistoryRunner;
