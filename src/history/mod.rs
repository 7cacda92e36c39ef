//! Migration history: which files have been applied, and where that is stored.
//!
//! Records are append-only. The runner talks to history only through
//! [`MigrationHistory`], so storage media and listing policy stay swappable.
/// Current schema version for the persisted history file.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

mod controller;
mod record;
mod storage;

pub use controller::{list_migrations, Controller, MigrationHistory};
pub use record::{now_epoch_ms, History, Record};
pub use storage::{LocalStorage, Storage, StorageConfig};
