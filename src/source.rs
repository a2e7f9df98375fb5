//! This module defines where the scheduler draws machines from: the `Source` trait,
//! the `Candidate` it yields, and `Pool`, a fixed list of machines loaded from a file.

use crate::machine::MachineDescriptor;
use crate::parser::parse;
use crate::types::BeaverError;
use std::fs;
use std::path::Path;

/// A descriptor together with its position in the source it was drawn from.
///
/// The position is the descriptor's identity for checkpointing and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub position: u64,
    pub descriptor: MachineDescriptor,
}

/// An ordered, resumable sequence of candidates.
///
/// Positions strictly increase along the sequence, and `advance` from the same cursor
/// always yields the same continuation.
pub trait Source: Send {
    /// A short name identifying the search, used to key checkpoints and output directories.
    fn name(&self) -> String;

    /// Returns the first candidate at or after `cursor` and the cursor following it,
    /// or `None` when the sequence is exhausted.
    fn advance(&self, cursor: u64) -> Option<(Candidate, u64)>;

    /// Rebuilds the candidate at `position`, e.g. to re-dispatch a pending entry.
    fn get(&self, position: u64) -> Result<Candidate, BeaverError>;

    /// Pulls up to `count` candidates starting at `cursor`.
    fn pull(&self, cursor: u64, count: usize) -> (Vec<Candidate>, u64) {
        let mut batch = Vec::with_capacity(count);
        let mut cursor = cursor;

        while batch.len() < count {
            match self.advance(cursor) {
                Some((candidate, next)) => {
                    batch.push(candidate);
                    cursor = next;
                }
                None => break,
            }
        }

        (batch, cursor)
    }
}

/// A fixed list of machines, typically long runners promoted from an earlier search
/// that should be re-run with a larger step budget.
#[derive(Debug, Clone)]
pub struct Pool {
    name: String,
    machines: Vec<MachineDescriptor>,
}

impl Pool {
    pub fn new(name: impl Into<String>, machines: Vec<MachineDescriptor>) -> Self {
        Self {
            name: name.into(),
            machines,
        }
    }

    /// Loads a pool file holding one machine in notation per line.
    ///
    /// Blank lines and lines starting with `#` are ignored. The pool is named after the
    /// file stem. Malformed-but-parseable machines (e.g. with `---` entries) are kept so that
    /// they are classified as errors when simulated.
    pub fn load(path: &Path) -> Result<Self, BeaverError> {
        let content = fs::read_to_string(path).map_err(|e| {
            BeaverError::FileError(format!("Failed to read pool {}: {}", path.display(), e))
        })?;

        let machines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(number, line)| {
                parse(line).map_err(|e| {
                    BeaverError::FileError(format!(
                        "Invalid machine on line {} of {}: {}",
                        number + 1,
                        path.display(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pool".to_string());

        Ok(Self::new(name, machines))
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl Source for Pool {
    fn name(&self) -> String {
        format!("pool_{}", self.name)
    }

    fn advance(&self, cursor: u64) -> Option<(Candidate, u64)> {
        let descriptor = self.machines.get(usize::try_from(cursor).ok()?)?;

        Some((
            Candidate {
                position: cursor,
                descriptor: descriptor.clone(),
            },
            cursor + 1,
        ))
    }

    fn get(&self, position: u64) -> Result<Candidate, BeaverError> {
        usize::try_from(position)
            .ok()
            .and_then(|index| self.machines.get(index))
            .map(|descriptor| Candidate {
                position,
                descriptor: descriptor.clone(),
            })
            .ok_or(BeaverError::PositionOutOfRange {
                position,
                space: self.machines.len() as u64,
            })
    }
}
