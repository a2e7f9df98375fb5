//! This module persists evaluated results as JSON Lines, one file per UTC day.

use crate::evaluator::LogEntry;
use crate::simulator::Outcome;
use crate::types::BeaverError;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File that collects machines which exhausted their step budget without a proven cycle.
pub const LONG_RUNNERS_FILE: &str = "long_runners.txt";
/// Prefix of the daily files holding only halting entries.
pub const HALTING_PREFIX: &str = "halting_";
/// Prefix of the daily files holding only entries that did not halt.
pub const NON_HALTING_PREFIX: &str = "non_halting_";

/// An append-only, durable sink for log entries.
pub trait RecordLog: Send {
    /// Appends entries in order. When this returns `Ok`, the entries are on stable storage.
    fn append(&mut self, entries: &[LogEntry]) -> Result<(), BeaverError>;

    /// Returns the positions of every entry already in the log.
    fn logged_positions(&self) -> Result<HashSet<u64>, BeaverError>;
}

/// Writes entries to `<prefix><YYYY-MM-DD>.jsonl` files, dated by each entry's timestamp.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    directory: PathBuf,
    prefix: String,
    promote_long_runners: bool,
    split_by_outcome: bool,
}

impl JsonlLogger {
    /// Creates a logger writing into `directory`, creating it if needed.
    pub fn new(
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Result<Self, BeaverError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| {
            BeaverError::persistence(format!("Failed to create {}", directory.display()), e)
        })?;

        Ok(Self {
            directory,
            prefix: prefix.into(),
            promote_long_runners: false,
            split_by_outcome: false,
        })
    }

    /// Also appends the notation of long runners to [`LONG_RUNNERS_FILE`].
    pub fn with_long_runners(mut self, enabled: bool) -> Self {
        self.promote_long_runners = enabled;
        self
    }

    /// Also copies each entry into [`HALTING_PREFIX`] or [`NON_HALTING_PREFIX`] daily files.
    ///
    /// The main log stays authoritative: recovery only consults it.
    pub fn with_outcome_splits(mut self, enabled: bool) -> Self {
        self.split_by_outcome = enabled;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the log file for a given day.
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dated_file(&self.prefix, date)
    }

    fn dated_file(&self, prefix: &str, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{}{}.jsonl", prefix, date.format("%Y-%m-%d")))
    }

    /// Reads every entry from all of this logger's files, oldest file first.
    pub fn entries(&self) -> Result<Vec<LogEntry>, BeaverError> {
        read_entries(&self.directory, &self.prefix)
    }

    fn promote(&self, entries: &[LogEntry]) -> Result<(), BeaverError> {
        let lines: String = entries
            .iter()
            .filter(|e| e.outcome == Outcome::StepLimitExceeded && e.cycle.is_none())
            .map(|e| format!("{}\n", e.machine))
            .collect();

        if lines.is_empty() {
            return Ok(());
        }

        append_synced(&self.directory.join(LONG_RUNNERS_FILE), lines.as_bytes())
    }
}

impl RecordLog for JsonlLogger {
    fn append(&mut self, entries: &[LogEntry]) -> Result<(), BeaverError> {
        let mut main: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut splits: BTreeMap<PathBuf, String> = BTreeMap::new();

        for entry in entries {
            let mut line = serde_json::to_string(entry)
                .map_err(|e| BeaverError::persistence("Failed to serialize log entry", e))?;
            line.push('\n');
            let day = entry.timestamp.date_naive();

            if self.split_by_outcome {
                let prefix = if entry.halted {
                    HALTING_PREFIX
                } else {
                    NON_HALTING_PREFIX
                };
                splits
                    .entry(self.dated_file(prefix, day))
                    .or_default()
                    .push_str(&line);
            }
            main.entry(self.file_for(day)).or_default().push_str(&line);
        }

        for (path, lines) in main.iter().chain(&splits) {
            append_synced(path, lines.as_bytes())?;
        }

        if self.promote_long_runners {
            self.promote(entries)?;
        }

        debug!(count = entries.len(), "Appended log entries");
        Ok(())
    }

    fn logged_positions(&self) -> Result<HashSet<u64>, BeaverError> {
        Ok(self.entries()?.into_iter().map(|e| e.position).collect())
    }
}

/// Reads all entries from `<prefix><YYYY-MM-DD>.jsonl` files in `directory`.
///
/// A final line without a trailing newline that fails to parse is treated as a torn write
/// and ignored. Any other malformed line is an error.
pub fn read_entries(directory: &Path, prefix: &str) -> Result<Vec<LogEntry>, BeaverError> {
    if !directory.exists() {
        return Ok(Vec::new());
    }

    let listing = fs::read_dir(directory).map_err(|e| {
        BeaverError::persistence(format!("Failed to list {}", directory.display()), e)
    })?;

    let mut files: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(prefix))
                .and_then(|rest| rest.strip_suffix(".jsonl"))
                .map(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut entries = Vec::new();
    for path in files {
        let content = fs::read_to_string(&path).map_err(|e| {
            BeaverError::persistence(format!("Failed to read {}", path.display()), e)
        })?;
        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) if !complete && index + 1 == lines.len() => {
                    warn!(file = %path.display(), "Ignoring torn final log line");
                }
                Err(e) => {
                    return Err(BeaverError::persistence(
                        format!("Malformed line {} in {}", index + 1, path.display()),
                        e,
                    ))
                }
            }
        }
    }

    Ok(entries)
}

/// Appends bytes to a file and syncs it, first dropping any torn final line.
fn append_synced(path: &Path, bytes: &[u8]) -> Result<(), BeaverError> {
    let context = |action: &str| format!("Failed to {} {}", action, path.display());

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| BeaverError::persistence(context("open"), e))?;

    truncate_torn_line(&mut file).map_err(|e| BeaverError::persistence(context("repair"), e))?;

    file.write_all(bytes)
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_data())
        .map_err(|e| BeaverError::persistence(context("write"), e))
}

/// Cuts the file back to just after its last newline.
fn truncate_torn_line(file: &mut File) -> std::io::Result<()> {
    const CHUNK: u64 = 4096;

    let length = file.metadata()?.len();
    let mut end = length;
    let mut buffer = vec![0u8; CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buffer[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if let Some(offset) = chunk.iter().rposition(|b| *b == b'\n') {
            end = start + offset as u64 + 1;
            break;
        }
        end = start;
    }

    if end != length {
        warn!(dropped = length - end, "Truncating torn final log line");
        file.set_len(end)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{classify, BestRecords};
    use crate::parser::parse;
    use crate::simulator::Simulator;
    use crate::source::Candidate;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn entry(position: u64, notation: &str, day: u32) -> LogEntry {
        let candidate = Candidate {
            position,
            descriptor: parse(notation).unwrap(),
        };
        let result = Simulator::new(100).run(&candidate);
        let at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
        classify(&candidate, &result, &BestRecords::default(), at)
            .unwrap()
            .entry
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut logger = JsonlLogger::new(dir.path(), "busybeaver_").unwrap();

        logger
            .append(&[entry(1, "1RB1LB_1LA1RZ", 4), entry(2, "1RZ0LA", 4)])
            .unwrap();
        logger.append(&[entry(5, "1RA1RZ", 4)]).unwrap();

        let path = logger.file_for(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert!(path.ends_with("busybeaver_2024-03-04.jsonl"));
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);

        let positions: Vec<u64> = logger.entries().unwrap().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 5]);
        assert_eq!(logger.logged_positions().unwrap().len(), 3);
    }

    #[test]
    fn test_daily_files() {
        let dir = tempdir().unwrap();
        let mut logger = JsonlLogger::new(dir.path(), "bb_").unwrap();

        logger
            .append(&[entry(1, "1RZ0LA", 4), entry(2, "1RZ0LA", 5)])
            .unwrap();

        assert!(dir.path().join("bb_2024-03-04.jsonl").exists());
        assert!(dir.path().join("bb_2024-03-05.jsonl").exists());
        assert_eq!(logger.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_torn_final_line_is_ignored_and_dropped() {
        let dir = tempdir().unwrap();
        let mut logger = JsonlLogger::new(dir.path(), "bb_").unwrap();
        logger.append(&[entry(1, "1RZ0LA", 4)]).unwrap();

        let path = dir.path().join("bb_2024-03-04.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"position\": 2, \"mach").unwrap();

        assert_eq!(logger.logged_positions().unwrap(), HashSet::from([1]));

        logger.append(&[entry(3, "1RZ0LA", 4)]).unwrap();
        let positions: Vec<u64> = logger.entries().unwrap().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[test]
    fn test_promotes_long_runners() {
        let dir = tempdir().unwrap();
        let mut logger = JsonlLogger::new(dir.path(), "bb_")
            .unwrap()
            .with_long_runners(true);

        logger
            .append(&[entry(1, "1RA1RZ", 4), entry(2, "1RB1LB_1LA1RZ", 4)])
            .unwrap();

        let promoted = fs::read_to_string(dir.path().join(LONG_RUNNERS_FILE)).unwrap();
        assert_eq!(promoted, "1RA1RZ\n");
    }

    #[test]
    fn test_outcome_splits() {
        let dir = tempdir().unwrap();
        let mut logger = JsonlLogger::new(dir.path(), "")
            .unwrap()
            .with_outcome_splits(true);

        logger
            .append(&[entry(1, "1RA1RZ", 4), entry(2, "1RB1LB_1LA1RZ", 4)])
            .unwrap();

        let halting = read_entries(dir.path(), HALTING_PREFIX).unwrap();
        let non_halting = read_entries(dir.path(), NON_HALTING_PREFIX).unwrap();
        assert_eq!(halting.iter().map(|e| e.position).collect::<Vec<_>>(), vec![2]);
        assert_eq!(non_halting.iter().map(|e| e.position).collect::<Vec<_>>(), vec![1]);

        // An empty prefix still reads only the main log.
        assert_eq!(logger.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_entries(&dir.path().join("nope"), "bb_").unwrap().is_empty());
    }
}
