//! This module runs batches of independent simulations, sequentially or on a thread pool.

use crate::simulator::{SimulationResult, Simulator};
use crate::source::Candidate;
use crate::types::BeaverError;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// How a batch of candidates is spread over the hardware.
///
/// Implementations must return exactly one result per candidate, in input order, and must
/// not let the failure of one simulation affect any other.
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, simulator: &Simulator, candidates: &[Candidate]) -> Vec<SimulationResult>;
}

/// Runs simulations one after another on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sequential;

impl ExecutionStrategy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(&self, simulator: &Simulator, candidates: &[Candidate]) -> Vec<SimulationResult> {
        candidates
            .iter()
            .map(|candidate| run_isolated(simulator, candidate))
            .collect()
    }
}

/// Runs simulations data-parallel on a dedicated rayon thread pool.
pub struct Parallel {
    pool: rayon::ThreadPool,
}

impl Parallel {
    /// Builds a pool with `threads` workers, or one per logical CPU when `threads` is zero.
    pub fn new(threads: usize) -> Result<Self, BeaverError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("beaver-sim-{index}"))
            .build()
            .map_err(|e| BeaverError::Config(format!("Failed to build thread pool: {e}")))?;

        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ExecutionStrategy for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn execute(&self, simulator: &Simulator, candidates: &[Candidate]) -> Vec<SimulationResult> {
        self.pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| run_isolated(simulator, candidate))
                .collect()
        })
    }
}

/// Drives batches of candidates through a simulator using an execution strategy.
pub struct BatchExecutor {
    simulator: Simulator,
    strategy: Box<dyn ExecutionStrategy>,
}

impl BatchExecutor {
    pub fn new(simulator: Simulator, strategy: Box<dyn ExecutionStrategy>) -> Self {
        Self {
            simulator,
            strategy,
        }
    }

    /// Creates a sequential executor.
    pub fn sequential(simulator: Simulator) -> Self {
        Self::new(simulator, Box::new(Sequential))
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn strategy(&self) -> &str {
        self.strategy.name()
    }

    /// Simulates every candidate, returning one result per candidate in input order.
    pub fn run_batch(&self, candidates: &[Candidate]) -> Vec<SimulationResult> {
        debug!(
            size = candidates.len(),
            strategy = self.strategy.name(),
            "Running batch"
        );

        self.strategy.execute(&self.simulator, candidates)
    }
}

/// Runs one simulation, turning a panic into an `Error` result for that candidate only.
fn run_isolated(simulator: &Simulator, candidate: &Candidate) -> SimulationResult {
    panic::catch_unwind(AssertUnwindSafe(|| simulator.run(candidate))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "simulation panicked".to_string());

        warn!(position = candidate.position, %message, "Simulation panicked");
        SimulationResult::failed(candidate.position, message)
    })
}
