//! This module turns simulation results into log entries and tracks the best-known
//! machines for each search objective.

use crate::simulator::{Outcome, SimulationResult};
use crate::source::Candidate;
use crate::types::{state_label, BeaverError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the persisted record log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub position: u64,
    /// The machine in standard notation.
    pub machine: String,
    pub states: usize,
    pub symbols: usize,
    pub halted: bool,
    pub outcome: Outcome,
    pub steps: u64,
    pub ones: u64,
    pub checksum: String,
    /// Label of the state that took the halting transition.
    pub final_state: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    pub ruleset_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A quantity the search maximises over halting machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MaxSteps,
    MaxOnes,
}

impl Objective {
    pub const ALL: [Objective; 2] = [Objective::MaxSteps, Objective::MaxOnes];

    fn score(self, steps: u64, ones: u64) -> u64 {
        match self {
            Objective::MaxSteps => steps,
            Objective::MaxOnes => ones,
        }
    }
}

/// The best machine found so far for one objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestRecord {
    pub position: u64,
    pub machine: String,
    pub steps: u64,
    pub ones: u64,
}

impl BestRecord {
    fn from_entry(entry: &LogEntry) -> Self {
        Self {
            position: entry.position,
            machine: entry.machine.clone(),
            steps: entry.steps,
            ones: entry.ones,
        }
    }
}

/// Best-known halting machines by steps and by ones written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestRecords {
    pub max_steps: Option<BestRecord>,
    pub max_ones: Option<BestRecord>,
}

impl BestRecords {
    pub fn get(&self, objective: Objective) -> Option<&BestRecord> {
        match objective {
            Objective::MaxSteps => self.max_steps.as_ref(),
            Objective::MaxOnes => self.max_ones.as_ref(),
        }
    }

    fn slot(&mut self, objective: Objective) -> &mut Option<BestRecord> {
        match objective {
            Objective::MaxSteps => &mut self.max_steps,
            Objective::MaxOnes => &mut self.max_ones,
        }
    }

    /// Checks whether a halting entry would replace the current record for `objective`.
    ///
    /// Ties go to the lower position, so the result does not depend on dispatch order.
    pub fn beaten_by(&self, objective: Objective, entry: &LogEntry) -> bool {
        if !entry.halted {
            return false;
        }

        match self.get(objective) {
            None => true,
            Some(best) => {
                let current = objective.score(best.steps, best.ones);
                let candidate = objective.score(entry.steps, entry.ones);
                candidate > current || (candidate == current && entry.position < best.position)
            }
        }
    }

    /// Replaces the records named in `objectives` with `entry`.
    pub fn apply(&mut self, entry: &LogEntry, objectives: &[Objective]) {
        for objective in objectives {
            *self.slot(*objective) = Some(BestRecord::from_entry(entry));
        }
    }
}

/// The outcome of classifying one simulation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub entry: LogEntry,
    /// Objectives whose best-known record this result replaces.
    pub supersedes: Vec<Objective>,
}

/// Classifies a result, producing its log entry and the records it supersedes.
///
/// `best` is only read; callers apply the update with [`BestRecords::apply`].
pub fn classify(
    candidate: &Candidate,
    result: &SimulationResult,
    best: &BestRecords,
    at: DateTime<Utc>,
) -> Result<Evaluation, BeaverError> {
    if candidate.position != result.position {
        return Err(BeaverError::ValidationError(format!(
            "Result for position {} does not belong to candidate {}",
            result.position, candidate.position
        )));
    }

    if result.checksum.len() != 64 || !result.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BeaverError::ValidationError(format!(
            "Result for position {} has a malformed checksum '{}'",
            result.position, result.checksum
        )));
    }

    let machine = &candidate.descriptor;
    let entry = LogEntry {
        position: result.position,
        machine: machine.notation(),
        states: machine.states(),
        symbols: machine.symbols(),
        halted: result.halted(),
        outcome: result.outcome,
        steps: result.steps,
        ones: result.ones,
        checksum: result.checksum.to_ascii_lowercase(),
        final_state: result.final_state.map(state_label),
        cycle: result.cycle,
        ruleset_hash: machine.ruleset_hash(),
        timestamp: at,
    };

    let supersedes = Objective::ALL
        .into_iter()
        .filter(|objective| best.beaten_by(*objective, &entry))
        .collect();

    Ok(Evaluation { entry, supersedes })
}
