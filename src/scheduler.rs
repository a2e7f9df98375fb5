//! This module drives a search: it owns the checkpoint record, pulls batches from a
//! source, runs them, logs and checkpoints the results, and obeys operator commands.

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{ConfigWatcher, SearchConfig};
use crate::evaluator::{classify, Objective};
use crate::executor::{BatchExecutor, Parallel, Sequential};
use crate::logger::{JsonlLogger, RecordLog};
use crate::scoring::{prioritize, Scorer};
use crate::simulator::{Outcome, Simulator};
use crate::source::{Candidate, Source};
use crate::throttle::{Clock, SystemClock};
use crate::types::BeaverError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Init,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Init => "INIT",
            EngineState::Running => "RUNNING",
            EngineState::Paused => "PAUSED",
            EngineState::Stopping => "STOPPING",
            EngineState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// An operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl FromStr for Command {
    type Err = BeaverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            _ => Err(BeaverError::UnknownCommand(s.trim().to_string())),
        }
    }
}

/// Sends commands to a running scheduler from another thread.
///
/// Commands are picked up between batches.
#[derive(Debug, Clone)]
pub struct Controller {
    sender: Sender<Command>,
}

impl Controller {
    pub fn send(&self, command: Command) -> Result<(), BeaverError> {
        self.sender
            .send(command)
            .map_err(|_| BeaverError::InvalidCommand {
                command: command.to_string(),
                state: EngineState::Stopped.to_string(),
            })
    }

    /// Parses and sends a textual command, rejecting unknown ones.
    pub fn send_str(&self, text: &str) -> Result<Command, BeaverError> {
        let command = text.parse()?;
        self.send(command)?;
        Ok(command)
    }
}

/// A read-only view of the engine, published after every state change and batch.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub checkpoint: CheckpointRecord,
    /// Batch size used by the latest iteration.
    pub batch_size: usize,
    pub exhausted: bool,
    pub last_error: Option<String>,
}

/// Shared handle to the latest [`EngineSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotHandle(Arc<RwLock<EngineSnapshot>>);

impl SnapshotHandle {
    pub fn get(&self) -> EngineSnapshot {
        self.0.read().clone()
    }

    fn publish(&self, snapshot: EngineSnapshot) {
        *self.0.write() = snapshot;
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub dispatched: usize,
    pub logged: usize,
    pub skipped: usize,
    /// Candidates re-dispatched from the pending set of an interrupted run.
    pub recovered: usize,
    pub batch_size: usize,
    pub throttled: bool,
    pub new_best: Vec<Objective>,
    /// The source had nothing left to dispatch.
    pub exhausted: bool,
}

/// The search control loop.
pub struct Scheduler {
    config: SearchConfig,
    source: Box<dyn Source>,
    store: CheckpointStore,
    log: Box<dyn RecordLog>,
    executor: BatchExecutor,
    clock: Box<dyn Clock>,
    scorer: Option<Box<dyn Scorer>>,
    watcher: Option<ConfigWatcher>,
    state: EngineState,
    record: CheckpointRecord,
    /// Pending positions that already reached the log before an interruption.
    recovered: HashSet<u64>,
    batch_size: usize,
    exhausted: bool,
    failure: Option<BeaverError>,
    commands: Receiver<Command>,
    sender: Sender<Command>,
    snapshots: SnapshotHandle,
}

impl Scheduler {
    pub fn new(
        config: SearchConfig,
        source: Box<dyn Source>,
        store: CheckpointStore,
        log: Box<dyn RecordLog>,
    ) -> Result<Self, BeaverError> {
        config.validate()?;

        let simulator = Simulator::new(config.step_limit).with_cycle_check(config.cycle_detection);
        let executor = if config.parallel {
            BatchExecutor::new(simulator, Box::new(Parallel::new(config.threads)?))
        } else {
            BatchExecutor::new(simulator, Box::new(Sequential))
        };

        let record = CheckpointRecord::new(source.name());
        let (sender, commands) = mpsc::channel();
        let snapshots = SnapshotHandle(Arc::new(RwLock::new(EngineSnapshot {
            state: EngineState::Init,
            checkpoint: record.clone(),
            batch_size: config.batch_size,
            exhausted: false,
            last_error: None,
        })));

        Ok(Self {
            batch_size: config.batch_size,
            config,
            source,
            store,
            log,
            executor,
            clock: Box::new(SystemClock),
            scorer: None,
            watcher: None,
            state: EngineState::Init,
            record,
            recovered: HashSet::new(),
            exhausted: false,
            failure: None,
            commands,
            sender,
            snapshots,
        })
    }

    /// Builds a scheduler writing into the configured output directory.
    pub fn from_config(config: SearchConfig) -> Result<Self, BeaverError> {
        let source = config.source()?;
        let name = source.name();
        let store = CheckpointStore::new(config.checkpoint_path(&name));
        let log = JsonlLogger::new(config.search_dir(&name), config.log_file_prefix.clone())?
            .with_long_runners(config.promote_long_runners)
            .with_outcome_splits(config.split_by_outcome);

        Self::new(config, source, store, Box::new(log))
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_scorer(mut self, scorer: impl Scorer + 'static) -> Self {
        self.scorer = Some(Box::new(scorer));
        self
    }

    pub fn with_config_watcher(mut self, watcher: ConfigWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The last record written to the checkpoint store.
    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn controller(&self) -> Controller {
        Controller {
            sender: self.sender.clone(),
        }
    }

    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// Applies an operator command, returning the resulting state.
    ///
    /// A command that is already satisfied by the current state is a no-op. A command with no
    /// transition from the current state is rejected and leaves the state unchanged.
    pub fn handle(&mut self, command: Command) -> Result<EngineState, BeaverError> {
        use EngineState::*;

        match (self.state, command) {
            (Init, Command::Start) => self.start()?,
            (Running | Paused, Command::Start)
            | (Paused, Command::Pause)
            | (Running, Command::Resume)
            | (Stopping | Stopped, Command::Stop) => {
                debug!(%command, state = %self.state, "Command already satisfied");
            }
            (Running, Command::Pause) => self.transition(Paused),
            (Paused, Command::Resume) => self.transition(Running),
            (Init, Command::Stop) => self.transition(Stopped),
            (Running | Paused, Command::Stop) => self.shutdown()?,
            (state, command) => {
                return Err(BeaverError::InvalidCommand {
                    command: command.to_string(),
                    state: state.to_string(),
                })
            }
        }

        Ok(self.state)
    }

    /// Loads the checkpoint and moves to `Running`.
    fn start(&mut self) -> Result<(), BeaverError> {
        let name = self.source.name();
        let record = match self.store.load(&name) {
            Ok(record) => record,
            Err(e) => {
                self.fail(e.clone());
                self.transition(EngineState::Stopped);
                return Err(e);
            }
        };

        if record.needs_recovery() {
            let logged = self.log.logged_positions()?;
            self.recovered = record
                .pending
                .iter()
                .copied()
                .filter(|position| logged.contains(position))
                .collect();

            warn!(
                pending = record.pending.len(),
                already_logged = self.recovered.len(),
                "Resuming an interrupted batch"
            );
        }

        info!(
            source = %name,
            cursor = record.cursor,
            strategy = self.executor.strategy(),
            step_limit = self.executor.simulator().step_limit(),
            "Search started"
        );

        self.record = record;
        self.transition(EngineState::Running);
        Ok(())
    }

    /// Runs one batch: pull, mark pending, simulate, log, checkpoint.
    ///
    /// The cursor and pending set only change on disk after the batch's entries are
    /// durably logged. On error the in-memory record still matches the last saved one.
    /// Only a `Running` engine, whose record came from the checkpoint store, runs batches.
    pub fn iterate(&mut self) -> Result<IterationReport, BeaverError> {
        if self.state != EngineState::Running {
            return Err(BeaverError::NotRunning(self.state.to_string()));
        }

        let now = self.clock.local();
        let throttled = self.config.throttle.is_active(now);
        self.batch_size = self.config.throttle.batch_size(self.config.batch_size, now);

        let recovering = self.record.needs_recovery();
        let (batch, next_cursor) = if recovering {
            self.pending_batch()?
        } else {
            self.source.pull(self.record.cursor, self.batch_size)
        };

        let mut report = IterationReport {
            batch_size: self.batch_size,
            throttled,
            ..IterationReport::default()
        };

        if batch.is_empty() {
            self.exhausted = true;
            report.exhausted = true;
            self.publish();
            return Ok(report);
        }

        let batch = match (&mut self.scorer, self.config.use_scoring) {
            (Some(scorer), true) => prioritize(batch, scorer.as_mut()),
            _ => batch,
        };

        if recovering {
            report.recovered = batch.len();
        } else {
            let mut marked = self.record.clone();
            marked.pending.extend(batch.iter().map(|c| c.position));
            self.save_with_retry(&marked)?;
            self.record = marked;
        }

        let results = self.executor.run_batch(&batch);
        let at = self.clock.utc();

        let mut next = self.record.clone();
        let mut entries = Vec::with_capacity(batch.len());
        let mut already_logged = 0;

        for (candidate, result) in batch.iter().zip(&results) {
            if result.outcome == Outcome::Error {
                warn!(
                    position = candidate.position,
                    machine = %candidate.descriptor,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Skipping malformed machine"
                );
                next.skipped.insert(candidate.position);
                report.skipped += 1;
                continue;
            }

            let evaluation = match classify(candidate, result, &next.best, at) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(position = candidate.position, error = %e, "Skipping invalid result");
                    next.skipped.insert(candidate.position);
                    report.skipped += 1;
                    continue;
                }
            };

            if !evaluation.supersedes.is_empty() {
                info!(
                    machine = %evaluation.entry.machine,
                    steps = evaluation.entry.steps,
                    ones = evaluation.entry.ones,
                    objectives = ?evaluation.supersedes,
                    "New best machine"
                );
                next.best.apply(&evaluation.entry, &evaluation.supersedes);
                for objective in &evaluation.supersedes {
                    if !report.new_best.contains(objective) {
                        report.new_best.push(*objective);
                    }
                }
            }

            if self.recovered.contains(&candidate.position) {
                already_logged += 1;
            } else {
                entries.push(evaluation.entry);
            }
        }

        self.log.append(&entries)?;

        for candidate in &batch {
            next.pending.remove(&candidate.position);
        }
        next.cursor = next.cursor.max(next_cursor);
        next.batches_completed += 1;
        // Lines written before an interruption were never counted in a saved record.
        next.logged += (entries.len() + already_logged) as u64;
        next.updated_at = Some(at);

        self.save_with_retry(&next)?;
        self.record = next;
        self.recovered.clear();

        report.dispatched = batch.len();
        report.logged = entries.len();

        info!(
            dispatched = report.dispatched,
            logged = report.logged,
            skipped = report.skipped,
            cursor = self.record.cursor,
            throttled,
            "Batch complete"
        );

        self.publish();
        Ok(report)
    }

    /// Runs until the source is exhausted, a fatal error occurs or a stop command arrives.
    ///
    /// Returns the final checkpoint record, or the error that stopped the search.
    pub fn run(&mut self) -> Result<CheckpointRecord, BeaverError> {
        if self.state == EngineState::Init {
            self.handle(Command::Start)?;
        }

        loop {
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }

            match self.state {
                EngineState::Running => self.step(),
                EngineState::Paused => {
                    info!("Search paused");
                    if let Ok(command) = self.commands.recv() {
                        self.apply(command);
                    }
                }
                EngineState::Stopping => {
                    // The error is kept in `failure` and returned below.
                    let _ = self.finish();
                }
                EngineState::Stopped => break,
                EngineState::Init => self.apply(Command::Start),
            }
        }

        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.record.clone()),
        }
    }

    /// Moves to `Stopping`, saves the record one last time and moves to `Stopped`.
    pub fn shutdown(&mut self) -> Result<(), BeaverError> {
        if self.state == EngineState::Init {
            self.transition(EngineState::Stopped);
            return Ok(());
        }

        self.transition(EngineState::Stopping);
        self.finish()
    }

    fn finish(&mut self) -> Result<(), BeaverError> {
        let saved = self.save_with_retry(&self.record);
        if let Err(e) = &saved {
            error!(error = %e, "Final checkpoint save failed");
            self.fail(e.clone());
        }
        self.transition(EngineState::Stopped);

        info!(
            cursor = self.record.cursor,
            batches = self.record.batches_completed,
            logged = self.record.logged,
            skipped = self.record.skipped.len(),
            "Search stopped"
        );
        saved
    }

    fn step(&mut self) {
        self.reload_config();

        match self.iterate() {
            Ok(report) if report.exhausted => {
                info!("Source exhausted");
                self.transition(EngineState::Stopping);
            }
            Ok(_) => {
                let pacing = self.config.throttle.pacing(self.clock.local());
                if !pacing.is_zero() {
                    if let Ok(command) = self.commands.recv_timeout(pacing) {
                        self.apply(command);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Iteration failed, stopping");
                self.fail(e);
                self.transition(EngineState::Stopping);
            }
        }
    }

    fn apply(&mut self, command: Command) {
        if let Err(e) = self.handle(command) {
            warn!(error = %e, "Rejected command");
        }
    }

    fn reload_config(&mut self) {
        if !self.config.hot_reload {
            return;
        }

        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };

        match watcher.poll() {
            Ok(Some(updated)) => {
                let changed = self.config.apply_reload(&updated);
                if !changed.is_empty() {
                    info!(?changed, "Reloaded configuration");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring invalid configuration change"),
        }
    }

    /// Rebuilds the pending positions of an interrupted batch.
    fn pending_batch(&self) -> Result<(Vec<Candidate>, u64), BeaverError> {
        let batch = self
            .record
            .pending
            .iter()
            .map(|position| self.source.get(*position))
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = self
            .record
            .pending
            .last()
            .map_or(self.record.cursor, |last| last + 1);

        Ok((batch, next_cursor))
    }

    fn save_with_retry(&self, record: &CheckpointRecord) -> Result<(), BeaverError> {
        let mut attempt = 0;

        loop {
            match self.store.save(record) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.save_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Checkpoint save failed, retrying");
                    thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&mut self, error: BeaverError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    fn transition(&mut self, state: EngineState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State change");
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.publish(EngineSnapshot {
            state: self.state,
            checkpoint: self.record.clone(),
            batch_size: self.batch_size,
            exhausted: self.exhausted,
            last_error: self.failure.as_ref().map(|e| e.to_string()),
        });
    }
}
