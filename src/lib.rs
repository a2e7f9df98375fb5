//! This crate provides the core of a busy beaver search engine.
//! It enumerates small Turing machines without symmetric duplicates, simulates them under
//! a step budget in parallel batches, and records results with crash-consistent checkpoints
//! under a throttle-aware scheduler.

pub mod checkpoint;
pub mod config;
pub mod enumerator;
pub mod evaluator;
pub mod executor;
pub mod logger;
pub mod machine;
pub mod parser;
pub mod scheduler;
pub mod scoring;
pub mod simulator;
pub mod source;
pub mod throttle;
pub mod types;

/// Re-exports the `Rule` enum from the parser module, used by the `pest` grammar.
pub use crate::parser::Rule;
/// Re-exports the checkpoint record and its store.
pub use checkpoint::{CheckpointRecord, CheckpointStore};
/// Re-exports the configuration types.
pub use config::{ConfigWatcher, SearchConfig};
/// Re-exports the `Enumerator` struct from the enumerator module.
pub use enumerator::Enumerator;
/// Re-exports the result classification types from the evaluator module.
pub use evaluator::{classify, BestRecord, BestRecords, Evaluation, LogEntry, Objective};
/// Re-exports the batch executor and its execution strategies.
pub use executor::{BatchExecutor, ExecutionStrategy, Parallel, Sequential};
/// Re-exports the record log types.
pub use logger::{JsonlLogger, RecordLog};
/// Re-exports the `MachineDescriptor` struct from the machine module.
pub use machine::MachineDescriptor;
/// Re-exports the `parse` function from the parser module.
pub use parser::parse;
/// Re-exports the control loop and its operator interface.
pub use scheduler::{
    Command, Controller, EngineSnapshot, EngineState, IterationReport, Scheduler, SnapshotHandle,
};
/// Re-exports the `Scorer` trait from the scoring module.
pub use scoring::Scorer;
/// Re-exports the simulation types from the simulator module.
pub use simulator::{Outcome, SimulationResult, Simulator};
/// Re-exports the machine sources and their candidate type.
pub use source::{Candidate, Pool, Source};
/// Re-exports the throttle window and its clocks.
pub use throttle::{Clock, FixedClock, SystemClock, ThrottleWindow};
/// Re-exports the machine definition types from the types module.
pub use types::{BeaverError, Direction, NextState, Transition};
