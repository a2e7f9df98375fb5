//! This module persists search progress so that an interrupted search resumes exactly
//! where it left off.

use crate::evaluator::BestRecords;
use crate::types::BeaverError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Durable search progress.
///
/// Every position below `cursor` is logged, skipped or still in `pending`. Positions in
/// `pending` were dispatched but their results were not yet known to be in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Name of the source this record belongs to, e.g. `s2_k2`.
    pub source: String,
    /// The next position to pull from the source.
    pub cursor: u64,
    #[serde(default)]
    pub pending: BTreeSet<u64>,
    /// Positions whose simulation ended in `Error`.
    #[serde(default)]
    pub skipped: BTreeSet<u64>,
    #[serde(default)]
    pub best: BestRecords,
    #[serde(default)]
    pub batches_completed: u64,
    /// Number of entries written to the record log.
    #[serde(default)]
    pub logged: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    /// Creates the record for a search that has not started yet.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            cursor: 0,
            pending: BTreeSet::new(),
            skipped: BTreeSet::new(),
            best: BestRecords::default(),
            batches_completed: 0,
            logged: 0,
            updated_at: None,
        }
    }

    /// Checks whether a previous run was interrupted mid-batch.
    pub fn needs_recovery(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Loads and atomically replaces a single checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored record, or `None` when no checkpoint has been written yet.
    pub fn read(&self) -> Result<Option<CheckpointRecord>, BeaverError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BeaverError::persistence(
                    format!("Failed to read checkpoint {}", self.path.display()),
                    e,
                ))
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            BeaverError::persistence(
                format!("Corrupt checkpoint {}", self.path.display()),
                e,
            )
        })
    }

    /// Loads the record for `source`, starting fresh when none exists.
    ///
    /// Fails when the stored record belongs to a different source, since resuming it would
    /// mix positions from two search spaces.
    pub fn load(&self, source: &str) -> Result<CheckpointRecord, BeaverError> {
        match self.read()? {
            None => {
                info!(path = %self.path.display(), "No checkpoint found, starting fresh");
                Ok(CheckpointRecord::new(source))
            }
            Some(record) if record.source != source => Err(BeaverError::Persistence(format!(
                "Checkpoint {} belongs to '{}', not '{}'",
                self.path.display(),
                record.source,
                source
            ))),
            Some(record) => {
                info!(
                    cursor = record.cursor,
                    pending = record.pending.len(),
                    skipped = record.skipped.len(),
                    "Loaded checkpoint"
                );
                Ok(record)
            }
        }
    }

    /// Atomically replaces the stored record.
    ///
    /// The record is written to a temporary file in the same directory, synced, then renamed
    /// over the checkpoint, so readers see either the old or the new record in full.
    pub fn save(&self, record: &CheckpointRecord) -> Result<(), BeaverError> {
        let fail = |e: std::io::Error| {
            BeaverError::persistence(
                format!("Failed to save checkpoint {}", self.path.display()),
                e,
            )
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(fail)?;

        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| BeaverError::persistence("Failed to serialize checkpoint", e))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(fail)?;
        tmp.write_all(&bytes).map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        tmp.persist(&self.path).map_err(|e| fail(e.error))?;

        // Best effort: make the rename itself durable.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }

        debug!(cursor = record.cursor, pending = record.pending.len(), "Saved checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_starts_fresh() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let record = store.load("s2_k2").unwrap();
        assert_eq!(record, CheckpointRecord::new("s2_k2"));
        assert!(!record.needs_recovery());
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/checkpoint.json"));

        let mut record = CheckpointRecord::new("s2_k2");
        record.cursor = 42;
        record.pending.extend([40, 41]);
        record.skipped.insert(7);
        record.updated_at = Some(Utc::now());
        store.save(&record).unwrap();

        let loaded = store.load("s2_k2").unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.needs_recovery());

        record.pending.clear();
        store.save(&record).unwrap();
        assert!(store.load("s2_k2").unwrap().pending.is_empty());

        let leftovers = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_rejects_other_source() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.save(&CheckpointRecord::new("s2_k2")).unwrap();

        assert!(matches!(
            store.load("s3_k2"),
            Err(BeaverError::Persistence(_))
        ));
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{\"source\": \"s2_k2\", \"cur").unwrap();

        assert!(CheckpointStore::new(path).load("s2_k2").is_err());
    }

    #[test]
    fn test_save_fails_under_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let store = CheckpointStore::new(blocker.join("checkpoint.json"));
        assert!(store.save(&CheckpointRecord::new("s2_k2")).is_err());
    }

    #[test]
    fn test_partial_record_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{\"source\": \"pool_x\", \"cursor\": 3}").unwrap();

        let record = CheckpointStore::new(path).load("pool_x").unwrap();
        assert_eq!(record.cursor, 3);
        assert!(record.best.max_steps.is_none());
    }
}
