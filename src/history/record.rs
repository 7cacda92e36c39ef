use super::HISTORY_SCHEMA_VERSION;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at_epoch_ms: Option<u128>,
}

/// Persisted history, keyed by migration filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub schema_version: u32,
    #[serde(default)]
    pub records: BTreeMap<String, Record>,
}

impl Default for History {
    fn default() -> Self {
        Self {
            schema_version: HISTORY_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl History {
    /// Decode stored bytes. Empty input is a fresh history.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let history: History =
            serde_json::from_slice(bytes).map_err(|err| Error::json("parse history JSON", err))?;
        if history.schema_version != HISTORY_SCHEMA_VERSION {
            return Err(Error::HistoryVersion(history.schema_version));
        }
        Ok(history)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec_pretty(self).map_err(|err| Error::json("serialize history", err))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.records.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record unless `filename` is already present.
    ///
    /// Returns false for an existing filename; records are never overwritten.
    pub fn insert(&mut self, filename: &str, record: Record) -> bool {
        if self.records.contains_key(filename) {
            return false;
        }
        self.records.insert(filename.to_string(), record);
        true
    }
}

/// Current epoch time in milliseconds for record timestamps.
pub fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
