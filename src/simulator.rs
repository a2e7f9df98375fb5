//! This module simulates a single machine from a blank tape for a bounded number of steps
//! and classifies how the run ended.

use crate::machine::MachineDescriptor;
use crate::source::Candidate;
use crate::types::{
    state_label, Direction, NextState, StateIndex, Symbol, BLANK, DEFAULT_STEP_LIMIT,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// How a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The machine took a halting transition.
    Halted,
    /// The step budget ran out (or the run was proven to cycle) before the machine halted.
    StepLimitExceeded,
    /// The machine reached a malformed table entry.
    Error,
}

/// The classified result of one simulation. Identical inputs produce identical results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// The position of the simulated descriptor in its source.
    pub position: u64,
    pub outcome: Outcome,
    /// Steps executed, including the halting transition.
    pub steps: u64,
    /// Count of non-blank cells on the final tape.
    pub ones: u64,
    /// SHA-256 hex digest of the final tape's non-blank span.
    pub checksum: String,
    /// The state that took the halting transition.
    pub final_state: Option<StateIndex>,
    /// The period of the repeated configuration, when the cycle check fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimulationResult {
    /// Builds an `Error` result for a run that could not produce a tape.
    pub fn failed(position: u64, message: impl Into<String>) -> Self {
        Self {
            position,
            outcome: Outcome::Error,
            steps: 0,
            ones: 0,
            checksum: Tape::new().checksum(),
            final_state: None,
            cycle: None,
            error: Some(message.into()),
        }
    }

    /// Checks whether the machine halted.
    pub fn halted(&self) -> bool {
        self.outcome == Outcome::Halted
    }
}

/// A two-sided tape that grows as the head moves past either end.
///
/// Cells that were never written hold [`BLANK`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tape {
    cells: VecDeque<Symbol>,
    head: usize,
    /// Index in `cells` of tape position zero.
    origin: usize,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    /// Creates an all-blank tape with the head at position zero.
    pub fn new() -> Self {
        Self {
            cells: VecDeque::from([BLANK]),
            head: 0,
            origin: 0,
        }
    }

    /// Returns the symbol under the head.
    pub fn read(&self) -> Symbol {
        self.cells[self.head]
    }

    /// Writes a symbol under the head.
    pub fn write(&mut self, symbol: Symbol) {
        self.cells[self.head] = symbol;
    }

    /// Moves the head one cell, extending the tape with a blank when needed.
    pub fn shift(&mut self, direction: Direction) {
        match direction {
            Direction::Left => {
                if self.head == 0 {
                    // Extend tape to the left
                    self.cells.push_front(BLANK);
                    self.origin += 1;
                } else {
                    self.head -= 1;
                }
            }
            Direction::Right => {
                self.head += 1;
                if self.head >= self.cells.len() {
                    self.cells.push_back(BLANK);
                }
            }
        }
    }

    /// Returns the head's position relative to the starting cell.
    pub fn position(&self) -> i64 {
        self.head as i64 - self.origin as i64
    }

    /// Returns the number of non-blank cells.
    pub fn ones(&self) -> u64 {
        self.cells.iter().filter(|&&s| s != BLANK).count() as u64
    }

    /// Returns the tape position of the first non-blank cell and the cells from there up to
    /// the last non-blank cell. An all-blank tape yields an empty span at position zero.
    pub fn span(&self) -> (i64, Vec<Symbol>) {
        let first = self.cells.iter().position(|&s| s != BLANK);
        let last = self.cells.iter().rposition(|&s| s != BLANK);

        match (first, last) {
            (Some(first), Some(last)) => (
                first as i64 - self.origin as i64,
                self.cells.range(first..=last).copied().collect(),
            ),
            _ => (0, Vec::new()),
        }
    }

    /// Returns the SHA-256 hex digest of the non-blank span.
    ///
    /// The digest covers the symbols only, so tapes that differ by a translation share it.
    pub fn checksum(&self) -> String {
        let (_, contents) = self.span();
        format!("{:x}", Sha256::digest(&contents))
    }

    /// Renders every visited cell with the head cell bracketed.
    pub fn render(&self) -> String {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if i == self.head {
                    format!("[{}]", s)
                } else {
                    s.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Represents the outcome of a single execution step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The machine performed a step and continues execution.
    Continue,
    /// The machine performed a halting transition.
    Halt,
    /// The machine read an entry it cannot execute.
    Error(String),
}

/// The running state of one machine: its tape, head and current state.
///
/// An `Execution` is owned by exactly one simulation and is never shared.
pub struct Execution<'a> {
    machine: &'a MachineDescriptor,
    tape: Tape,
    state: StateIndex,
    steps: u64,
    halted_in: Option<StateIndex>,
}

impl<'a> Execution<'a> {
    /// Creates an execution on a blank tape in the start state.
    pub fn new(machine: &'a MachineDescriptor) -> Self {
        Self {
            machine,
            tape: Tape::new(),
            state: 0,
            steps: 0,
            halted_in: None,
        }
    }

    /// Executes a single transition.
    ///
    /// # Returns
    ///
    /// * `Step::Continue` if the machine moved into a regular state.
    /// * `Step::Halt` if the transition taken halts the machine (the step is counted).
    /// * `Step::Error(_)` if the entry is missing or refers outside the class.
    pub fn step(&mut self) -> Step {
        if self.halted_in.is_some() {
            return Step::Halt;
        }

        let symbol = self.tape.read();
        let transition = match self.machine.transition(self.state, symbol) {
            Some(t) => *t,
            None => {
                return Step::Error(format!(
                    "No transition defined for state {} and symbol {}",
                    state_label(self.state),
                    symbol
                ))
            }
        };

        if transition.write as usize >= self.machine.symbols() {
            return Step::Error(format!(
                "State {} writes symbol {} outside the alphabet",
                state_label(self.state),
                transition.write
            ));
        }

        self.tape.write(transition.write);
        self.tape.shift(transition.direction);
        self.steps += 1;

        match transition.next {
            NextState::Halt => {
                self.halted_in = Some(self.state);
                Step::Halt
            }
            NextState::State(next) if (next as usize) < self.machine.states() => {
                self.state = next;
                Step::Continue
            }
            NextState::State(next) => Step::Error(format!(
                "State {} moves to undefined state {}",
                state_label(self.state),
                next
            )),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> StateIndex {
        self.state
    }

    /// Returns the number of steps executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns the tape.
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    fn configuration(&self) -> Configuration {
        let (start, contents) = self.tape.span();
        Configuration {
            state: self.state,
            head: self.tape.position(),
            start,
            contents,
        }
    }
}

/// A full machine configuration, used to recognise exact repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Configuration {
    state: StateIndex,
    head: i64,
    start: i64,
    contents: Vec<Symbol>,
}

/// Runs machines for up to a fixed step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Simulator {
    step_limit: u64,
    cycle_check: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_LIMIT)
    }
}

impl Simulator {
    pub fn new(step_limit: u64) -> Self {
        Self {
            step_limit,
            cycle_check: false,
        }
    }

    /// Enables early `StepLimitExceeded` classification of machines that revisit an
    /// identical configuration.
    ///
    /// Snapshots are taken at power-of-two step counts and every later configuration is
    /// compared with the latest snapshot, so a cycle of period `p` entered by step `m` is
    /// found within roughly `2 * max(m, p)` steps.
    pub fn with_cycle_check(mut self, enabled: bool) -> Self {
        self.cycle_check = enabled;
        self
    }

    pub fn step_limit(&self) -> u64 {
        self.step_limit
    }

    pub fn cycle_check(&self) -> bool {
        self.cycle_check
    }

    /// Simulates a candidate from a blank tape and classifies the run.
    pub fn run(&self, candidate: &Candidate) -> SimulationResult {
        let mut execution = Execution::new(&candidate.descriptor);
        let mut snapshot: Option<(u64, Configuration)> = None;
        let mut next_snapshot = 1u64;
        let mut cycle = None;
        let mut error = None;

        let outcome = loop {
            if execution.steps() >= self.step_limit {
                break Outcome::StepLimitExceeded;
            }

            match execution.step() {
                Step::Continue => {}
                Step::Halt => break Outcome::Halted,
                Step::Error(message) => {
                    error = Some(message);
                    break Outcome::Error;
                }
            }

            if self.cycle_check {
                let steps = execution.steps();
                if let Some((taken_at, seen)) = &snapshot {
                    if seen.state == execution.state()
                        && seen.head == execution.tape().position()
                        && *seen == execution.configuration()
                    {
                        cycle = Some(steps - taken_at);
                        break Outcome::StepLimitExceeded;
                    }
                }

                if steps == next_snapshot {
                    snapshot = Some((steps, execution.configuration()));
                    next_snapshot = next_snapshot.saturating_mul(2);
                }
            }
        };

        let tape = execution.tape();
        SimulationResult {
            position: candidate.position,
            outcome,
            steps: execution.steps(),
            ones: tape.ones(),
            checksum: tape.checksum(),
            final_state: execution.halted_in,
            cycle,
            error,
        }
    }
}
