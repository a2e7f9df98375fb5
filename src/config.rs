//! This module loads, validates and hot-reloads the search configuration.

use crate::enumerator::Enumerator;
use crate::machine::check_class;
use crate::source::{Pool, Source};
use crate::throttle::ThrottleWindow;
use crate::types::{BeaverError, DEFAULT_STEP_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Runtime configuration of a search.
///
/// Every field has a default, so a configuration file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde(alias = "state_size")]
    pub states: usize,
    #[serde(alias = "num_symbols")]
    pub symbols: usize,
    /// Search a pool file instead of enumerating the (states, symbols) class.
    pub pool: Option<PathBuf>,
    #[serde(alias = "max_steps")]
    pub step_limit: u64,
    /// Full-speed batch size.
    pub batch_size: usize,
    pub parallel: bool,
    /// Worker threads for parallel batches; zero uses every core.
    #[serde(alias = "cpu_cores")]
    pub threads: usize,
    pub cycle_detection: bool,
    /// Dispatch each batch in descending score order.
    #[serde(alias = "rl_guided_mode")]
    pub use_scoring: bool,
    #[serde(alias = "throttle_schedule")]
    pub throttle: ThrottleWindow,
    /// Overrides `throttle.enabled` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_enabled: Option<bool>,
    pub output_directory: PathBuf,
    pub log_file_prefix: String,
    /// Defaults to `checkpoint.json` in the search directory.
    pub checkpoint_file: Option<PathBuf>,
    pub promote_long_runners: bool,
    /// Also write `halting_<date>.jsonl` and `non_halting_<date>.jsonl` copies of the log.
    pub split_by_outcome: bool,
    /// Extra attempts at saving a checkpoint before the search stops.
    pub save_retries: u32,
    pub retry_backoff_ms: u64,
    /// Re-read the throttle window, batch size and scoring toggle when the file changes.
    pub hot_reload: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            states: 3,
            symbols: 2,
            pool: None,
            step_limit: DEFAULT_STEP_LIMIT,
            batch_size: 4096,
            parallel: true,
            threads: 0,
            cycle_detection: false,
            use_scoring: false,
            throttle: ThrottleWindow::default(),
            throttle_enabled: None,
            output_directory: PathBuf::from("logs"),
            log_file_prefix: "busybeaver_".to_string(),
            checkpoint_file: None,
            promote_long_runners: true,
            split_by_outcome: false,
            save_retries: 3,
            retry_backoff_ms: 100,
            hot_reload: false,
        }
    }
}

impl SearchConfig {
    /// Reads a JSON configuration file, merging it over the defaults and validating it.
    pub fn load(path: &Path) -> Result<Self, BeaverError> {
        let content = fs::read_to_string(path).map_err(|e| {
            BeaverError::FileError(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config = Self::from_json(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, BeaverError> {
        let mut config: SearchConfig = serde_json::from_str(content)
            .map_err(|e| BeaverError::Config(format!("Invalid configuration: {e}")))?;

        if let Some(enabled) = config.throttle_enabled {
            config.throttle.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BeaverError> {
        if self.pool.is_none() {
            check_class(self.states, self.symbols)
                .map_err(|e| BeaverError::Config(e.to_string()))?;
        }

        if self.step_limit == 0 {
            return Err(BeaverError::Config("step_limit must be at least 1".into()));
        }

        if self.batch_size == 0 {
            return Err(BeaverError::Config("batch_size must be at least 1".into()));
        }

        if self.log_file_prefix.contains(['/', '\\']) {
            return Err(BeaverError::Config(format!(
                "log_file_prefix must not contain a path separator, got '{}'",
                self.log_file_prefix
            )));
        }

        self.throttle.validate()
    }

    /// Builds the configured source: the pool file when set, otherwise the enumerator.
    pub fn source(&self) -> Result<Box<dyn Source>, BeaverError> {
        match &self.pool {
            Some(path) => Ok(Box::new(Pool::load(path)?)),
            None => Ok(Box::new(Enumerator::new(self.states, self.symbols)?)),
        }
    }

    /// Returns the directory holding a search's log and checkpoint.
    pub fn search_dir(&self, source: &str) -> PathBuf {
        self.output_directory.join(source)
    }

    pub fn checkpoint_path(&self, source: &str) -> PathBuf {
        self.checkpoint_file
            .clone()
            .unwrap_or_else(|| self.search_dir(source).join("checkpoint.json"))
    }

    /// Copies the settings that may change while a search runs, returning the names of
    /// the ones that differed.
    pub fn apply_reload(&mut self, other: &SearchConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if self.throttle != other.throttle {
            self.throttle = other.throttle.clone();
            changed.push("throttle");
        }
        if self.batch_size != other.batch_size {
            self.batch_size = other.batch_size;
            changed.push("batch_size");
        }
        if self.use_scoring != other.use_scoring {
            self.use_scoring = other.use_scoring;
            changed.push("use_scoring");
        }

        changed
    }
}

/// Watches a configuration file and reloads it when its modification time changes.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = modified_time(&path);
        Self { path, modified }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the new configuration if the file changed since the last poll.
    ///
    /// A file that changed but fails to load is reported once; the next poll only reloads
    /// after a further change.
    pub fn poll(&mut self) -> Result<Option<SearchConfig>, BeaverError> {
        let modified = modified_time(&self.path);
        if modified.is_none() || modified == self.modified {
            return Ok(None);
        }

        self.modified = modified;
        SearchConfig::load(&self.path).map(Some)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let config = SearchConfig::from_json(r#"{"states": 2, "batch_size": 10}"#).unwrap();

        assert_eq!(config.states, 2);
        assert_eq!(config.symbols, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.step_limit, DEFAULT_STEP_LIMIT);
        assert_eq!(config.throttle, ThrottleWindow::default());
    }

    #[test]
    fn test_legacy_keys() {
        let config = SearchConfig::from_json(
            r#"{
                "state_size": 4,
                "num_symbols": 3,
                "max_steps": 5000,
                "cpu_cores": 8,
                "rl_guided_mode": true,
                "throttle_enabled": false,
                "throttle_schedule": {"start_hour": 1, "end_hour": 2, "days_active": ["Sunday"]}
            }"#,
        )
        .unwrap();

        assert_eq!((config.states, config.symbols), (4, 3));
        assert_eq!(config.step_limit, 5000);
        assert_eq!(config.threads, 8);
        assert!(config.use_scoring);
        assert!(!config.throttle.enabled);
        assert_eq!(config.throttle.start_hour, 1);
    }

    #[test]
    fn test_validation_errors() {
        for json in [
            r#"{"states": 0}"#,
            r#"{"symbols": 11}"#,
            r#"{"step_limit": 0}"#,
            r#"{"batch_size": 0}"#,
            r#"{"log_file_prefix": "a/b"}"#,
            r#"{"throttle": {"factor": 2.0}}"#,
            r#"{"states": "three"}"#,
        ] {
            assert!(
                matches!(SearchConfig::from_json(json), Err(BeaverError::Config(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_pool_skips_class_check() {
        let config = SearchConfig::from_json(r#"{"states": 99, "pool": "pools/x.txt"}"#).unwrap();
        assert_eq!(config.pool, Some(PathBuf::from("pools/x.txt")));
    }

    #[test]
    fn test_paths() {
        let config = SearchConfig::from_json(r#"{"output_directory": "out"}"#).unwrap();

        assert_eq!(config.search_dir("s2_k2"), PathBuf::from("out/s2_k2"));
        assert_eq!(
            config.checkpoint_path("s2_k2"),
            PathBuf::from("out/s2_k2/checkpoint.json")
        );
        assert_eq!(config.source().unwrap().name(), "s3_k2");
    }

    #[test]
    fn test_apply_reload() {
        let mut running = SearchConfig::default();
        let mut edited = SearchConfig {
            batch_size: 17,
            step_limit: 5,
            ..SearchConfig::default()
        };
        edited.throttle.factor = 0.5;

        let changed = running.apply_reload(&edited);

        assert_eq!(changed, vec!["throttle", "batch_size"]);
        assert_eq!(running.batch_size, 17);
        assert_eq!(running.step_limit, DEFAULT_STEP_LIMIT);
    }

    #[test]
    fn test_watcher_detects_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"batch_size": 10}"#).unwrap();

        let mut watcher = ConfigWatcher::new(&path);
        assert_eq!(watcher.poll().unwrap(), None);

        fs::write(&path, r#"{"batch_size": 20}"#).unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(watcher.poll().unwrap().unwrap().batch_size, 20);
        assert_eq!(watcher.poll().unwrap(), None);
    }
}
