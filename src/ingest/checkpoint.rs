//! Last successful incremental-sync timestamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::IngestError, storage};

pub const EPOCH: &str = "1970-01-01T00:00:00.000Z";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    last_sync: String,
}

pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Stored timestamp, or the epoch when nothing was synced yet.
    pub fn load(&self) -> Result<String, IngestError> {
        if !self.path.exists() {
            return Ok(EPOCH.to_string());
        }

        let data = std::fs::read(&self.path)
            .map_err(|err| IngestError::Checkpoint(format!("read failed: {err}")))?;
        let file: CheckpointFile = serde_json::from_slice(&data)
            .map_err(|err| IngestError::Checkpoint(format!("malformed checkpoint: {err}")))?;

        Ok(file.last_sync)
    }

    pub fn save(&self, timestamp: &str) -> Result<(), IngestError> {
        let data = serde_json::to_vec(&CheckpointFile {
            last_sync: timestamp.to_string(),
        })
        .map_err(|err| IngestError::Checkpoint(err.to_string()))?;

        storage::write_atomic(&self.path, &data)
            .map_err(|err| IngestError::Checkpoint(format!("write failed: {err}")))?;

        log::info!("sync checkpoint advanced to {timestamp}");
        Ok(())
    }
}

/// Latest parseable RFC 3339 timestamp among `values`, formatted with
/// millisecond precision. Unparseable values are skipped.
pub fn high_water_mark<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .filter(|value| !value.trim().is_empty())
        .filter_map(|value| match DateTime::parse_from_rfc3339(value.trim()) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(err) => {
                log::warn!("ignoring unparseable last-modified '{value}': {err}");
                None
            }
        })
        .max()
        .map(|latest: DateTime<Utc>| latest.to_rfc3339_opts(SecondsFormat::Millis, true))
}
