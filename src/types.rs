//! This module defines the core value types shared across the search engine: tape symbols,
//! head directions, transition entries, class limits and the crate-wide error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Rule;

/// A tape symbol. Symbol `0` is the blank every tape starts with.
pub type Symbol = u8;
/// An index into a machine's state set. State `0` is the start state.
pub type StateIndex = u8;

/// The blank symbol every tape cell holds before it is written.
pub const BLANK: Symbol = 0;
/// The largest number of states a machine class may have (`A` through `Y`).
pub const MAX_STATES: usize = 25;
/// The smallest tape alphabet a machine class may have.
pub const MIN_SYMBOLS: usize = 2;
/// The largest tape alphabet a machine class may have (digits `0` through `9`).
pub const MAX_SYMBOLS: usize = 10;
/// The letter used for the halt state in machine notation.
pub const HALT_LABEL: char = 'Z';
/// The default number of steps to execute before a machine is classified as a long runner.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Represents the possible directions a Turing Machine head can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// Move the head one position to the left.
    Left,
    /// Move the head one position to the right.
    Right,
}

impl Direction {
    /// Returns the direction reflected through the head position.
    pub fn mirrored(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Returns the notation letter for this direction (`L` or `R`).
    pub fn as_char(self) -> char {
        match self {
            Direction::Left => 'L',
            Direction::Right => 'R',
        }
    }
}

/// The state a transition moves the machine into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextState {
    /// Continue in the given state.
    State(StateIndex),
    /// Stop after applying the write and move of this transition.
    Halt,
}

/// A single transition table entry: what to write, where to move and which state follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    /// The symbol written under the head.
    pub write: Symbol,
    /// The direction the head moves after writing.
    pub direction: Direction,
    /// The state the machine enters after moving.
    pub next: NextState,
}

impl Transition {
    /// Creates a transition that continues in `next`.
    pub fn new(write: Symbol, direction: Direction, next: StateIndex) -> Self {
        Self {
            write,
            direction,
            next: NextState::State(next),
        }
    }

    /// Creates a halting transition.
    pub fn halt(write: Symbol, direction: Direction) -> Self {
        Self {
            write,
            direction,
            next: NextState::Halt,
        }
    }

    /// Checks whether this transition halts the machine.
    pub fn is_halt(&self) -> bool {
        self.next == NextState::Halt
    }
}

/// Returns the notation letter for a state index (`0` is `A`).
pub fn state_label(state: StateIndex) -> char {
    if (state as usize) < MAX_STATES {
        (b'A' + state) as char
    } else {
        '?'
    }
}

/// Represents the errors that can occur while building, searching or persisting machines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeaverError {
    /// The requested (states, symbols) class cannot be searched.
    #[error("Invalid machine class: {0}")]
    InvalidClass(String),
    /// A position was requested that lies outside a class's search space.
    #[error("Position {position} is outside the search space of {space} tables")]
    PositionOutOfRange { position: u64, space: u64 },
    /// Indicates an error during the parsing of a machine notation string.
    #[error("Machine notation parsing error: {0}")]
    ParseError(#[from] Box<pest::error::Error<Rule>>),
    /// Indicates a structural problem with a machine or a simulation result.
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// A checkpoint or record log could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Indicates an error related to reading configuration or pool files.
    #[error("File error: {0}")]
    FileError(String),
    /// The configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The operator sent text that is not a known command.
    #[error("Unknown command: '{0}' (expected start, pause, resume or stop)")]
    UnknownCommand(String),
    /// The operator sent a command that has no transition from the current engine state.
    #[error("Command '{command}' is not valid while the engine is {state}")]
    InvalidCommand { command: String, state: String },
    /// A batch was requested while the engine was not running.
    #[error("Batches only run while the engine is RUNNING, not {0}")]
    NotRunning(String),
}

impl BeaverError {
    pub(crate) fn persistence(
        context: impl std::fmt::Display,
        err: impl std::fmt::Display,
    ) -> Self {
        BeaverError::Persistence(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_serialization() {
        let left_json = serde_json::to_string(&Direction::Left).unwrap();
        let right_json = serde_json::to_string(&Direction::Right).unwrap();

        assert_eq!(left_json, "\"Left\"");
        assert_eq!(right_json, "\"Right\"");

        let left: Direction = serde_json::from_str(&left_json).unwrap();
        assert_eq!(left, Direction::Left);
    }

    #[test]
    fn test_direction_mirror() {
        assert_eq!(Direction::Left.mirrored(), Direction::Right);
        assert_eq!(Direction::Right.mirrored().mirrored(), Direction::Right);
    }

    #[test]
    fn test_transition_creation() {
        let transition = Transition::new(1, Direction::Right, 2);

        assert_eq!(transition.write, 1);
        assert_eq!(transition.direction, Direction::Right);
        assert_eq!(transition.next, NextState::State(2));
        assert!(!transition.is_halt());
        assert!(Transition::halt(1, Direction::Left).is_halt());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(state_label(0), 'A');
        assert_eq!(state_label(24), 'Y');
        assert_eq!(state_label(30), '?');
    }

    #[test]
    fn test_error_display() {
        let error = BeaverError::UnknownCommand("jump".to_string());

        let error_msg = format!("{}", error);
        assert!(error_msg.contains("Unknown command"));
        assert!(error_msg.contains("jump"));
    }
}
