//! This module defines `MachineDescriptor`, the immutable transition table of a
//! single machine, together with its notation, ruleset hash and table view.

use crate::types::{
    state_label, BeaverError, NextState, StateIndex, Symbol, Transition, HALT_LABEL, MAX_STATES,
    MAX_SYMBOLS, MIN_SYMBOLS,
};
use sha2::{Digest, Sha256};
use std::fmt;

/// The transition table of a Turing machine over `states` states and `symbols` tape symbols.
///
/// Entries are stored row-major: the entry for `(state, symbol)` lives at
/// `state * symbols + symbol`. A `None` entry is a missing transition, which makes the
/// descriptor malformed. Malformed descriptors can still be constructed so that they can
/// be dispatched and classified as errors, but [`MachineDescriptor::validate`] rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineDescriptor {
    states: usize,
    symbols: usize,
    table: Vec<Option<Transition>>,
}

impl MachineDescriptor {
    /// Creates a descriptor from a row-major table.
    ///
    /// Only the shape is checked here (class limits and `table.len() == states * symbols`);
    /// the contents of individual entries are checked by [`MachineDescriptor::validate`].
    pub fn new(
        states: usize,
        symbols: usize,
        table: Vec<Option<Transition>>,
    ) -> Result<Self, BeaverError> {
        check_class(states, symbols)?;

        if table.len() != states * symbols {
            return Err(BeaverError::ValidationError(format!(
                "Transition table has {} entries, expected {} for {} states and {} symbols",
                table.len(),
                states * symbols,
                states,
                symbols
            )));
        }

        Ok(Self {
            states,
            symbols,
            table,
        })
    }

    /// Creates a descriptor from a table whose shape the caller has already checked.
    pub(crate) fn from_checked_table(
        states: usize,
        symbols: usize,
        table: Vec<Option<Transition>>,
    ) -> Self {
        debug_assert_eq!(table.len(), states * symbols);
        Self {
            states,
            symbols,
            table,
        }
    }

    /// Returns the number of states.
    pub fn states(&self) -> usize {
        self.states
    }

    /// Returns the number of tape symbols.
    pub fn symbols(&self) -> usize {
        self.symbols
    }

    /// Returns the row-major transition table.
    pub fn table(&self) -> &[Option<Transition>] {
        &self.table
    }

    /// Returns the entry for `(state, symbol)`, or `None` when it is missing or out of range.
    pub fn transition(&self, state: StateIndex, symbol: Symbol) -> Option<&Transition> {
        let (state, symbol) = (state as usize, symbol as usize);
        if state >= self.states || symbol >= self.symbols {
            return None;
        }

        self.table[state * self.symbols + symbol].as_ref()
    }

    /// Checks that the table is total and every entry refers to valid symbols and states.
    pub fn validate(&self) -> Result<(), BeaverError> {
        for (index, entry) in self.table.iter().enumerate() {
            let state = state_label((index / self.symbols) as StateIndex);
            let symbol = index % self.symbols;

            let transition = entry.as_ref().ok_or_else(|| {
                BeaverError::ValidationError(format!(
                    "Missing transition for state {} and symbol {}",
                    state, symbol
                ))
            })?;

            if transition.write as usize >= self.symbols {
                return Err(BeaverError::ValidationError(format!(
                    "Transition for state {} and symbol {} writes symbol {} outside the alphabet",
                    state, symbol, transition.write
                )));
            }

            if let NextState::State(next) = transition.next {
                if next as usize >= self.states {
                    return Err(BeaverError::ValidationError(format!(
                        "Transition for state {} and symbol {} moves to undefined state {}",
                        state, symbol, next
                    )));
                }
            }
        }

        Ok(())
    }

    /// Checks whether at least one entry halts the machine.
    pub fn has_halt(&self) -> bool {
        self.table.iter().flatten().any(Transition::is_halt)
    }

    /// Returns the machine in standard text notation, e.g. `1RB1LB_1LA1RZ`.
    ///
    /// Rows are separated by `_`, halting entries target `Z` and missing entries are `---`.
    pub fn notation(&self) -> String {
        self.table
            .chunks(self.symbols)
            .map(|row| row.iter().map(entry_notation).collect::<String>())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Returns the lowercase SHA-256 hex digest of the machine's notation.
    pub fn ruleset_hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.notation().as_bytes()))
    }

    /// Returns a displayable state-by-symbol table of the transitions.
    pub fn table_view(&self) -> TableView<'_> {
        TableView(self)
    }
}

impl fmt::Display for MachineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notation())
    }
}

/// Renders a descriptor as a table with one row per state and one column per symbol.
///
/// ```text
///          0     1
/// State A  1RB   1LB
/// State B  1LA   HALT
/// ```
pub struct TableView<'a>(&'a MachineDescriptor);

impl fmt::Display for TableView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let machine = self.0;

        write!(f, "{:<9}", "")?;
        for symbol in 0..machine.symbols {
            write!(f, "{:<6}", symbol)?;
        }
        writeln!(f)?;

        for (state, row) in machine.table.chunks(machine.symbols).enumerate() {
            write!(f, "State {}  ", state_label(state as StateIndex))?;
            for entry in row {
                let cell = match entry {
                    Some(t) if t.is_halt() => format!("HALT{}", t.write),
                    _ => entry_notation(entry),
                };
                write!(f, "{:<6}", cell)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

/// Checks that a (states, symbols) class lies within the supported limits.
pub fn check_class(states: usize, symbols: usize) -> Result<(), BeaverError> {
    if !(1..=MAX_STATES).contains(&states) {
        return Err(BeaverError::InvalidClass(format!(
            "states must be between 1 and {}, got {}",
            MAX_STATES, states
        )));
    }

    if !(MIN_SYMBOLS..=MAX_SYMBOLS).contains(&symbols) {
        return Err(BeaverError::InvalidClass(format!(
            "symbols must be between {} and {}, got {}",
            MIN_SYMBOLS, MAX_SYMBOLS, symbols
        )));
    }

    Ok(())
}

fn entry_notation(entry: &Option<Transition>) -> String {
    match entry {
        None => "---".to_string(),
        Some(t) => {
            let write = char::from_digit(t.write as u32, 10).unwrap_or('?');
            let target = match t.next {
                NextState::Halt => HALT_LABEL,
                NextState::State(next) => state_label(next),
            };
            format!("{}{}{}", write, t.direction.as_char(), target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction::{Left, Right};

    /// The two-state, two-symbol busy beaver champion.
    fn champion() -> MachineDescriptor {
        MachineDescriptor::new(
            2,
            2,
            vec![
                Some(Transition::new(1, Right, 1)),
                Some(Transition::new(1, Left, 1)),
                Some(Transition::new(1, Left, 0)),
                Some(Transition::halt(1, Right)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_notation() {
        assert_eq!(champion().notation(), "1RB1LB_1LA1RZ");
        assert_eq!(champion().to_string(), "1RB1LB_1LA1RZ");
    }

    #[test]
    fn test_lookup_transition() {
        let machine = champion();

        assert_eq!(
            machine.transition(1, 0),
            Some(&Transition::new(1, Left, 0))
        );
        assert!(machine.transition(1, 1).unwrap().is_halt());
        assert_eq!(machine.transition(2, 0), None);
        assert_eq!(machine.transition(0, 5), None);
    }

    #[test]
    fn test_validate_well_formed() {
        assert!(champion().validate().is_ok());
        assert!(champion().has_halt());
    }

    #[test]
    fn test_validate_rejects_missing_entry() {
        let machine = MachineDescriptor::new(
            1,
            2,
            vec![Some(Transition::new(1, Right, 0)), None],
        )
        .unwrap();

        let err = machine.validate().unwrap_err();
        assert!(err.to_string().contains("Missing transition for state A and symbol 1"));
        assert_eq!(machine.notation(), "1RA---");
    }

    #[test]
    fn test_validate_rejects_out_of_range_entries() {
        let bad_state = MachineDescriptor::new(
            1,
            2,
            vec![Some(Transition::new(1, Right, 3)), Some(Transition::halt(1, Right))],
        )
        .unwrap();
        assert!(bad_state.validate().is_err());

        let bad_symbol = MachineDescriptor::new(
            1,
            2,
            vec![Some(Transition::new(7, Right, 0)), Some(Transition::halt(1, Right))],
        )
        .unwrap();
        assert!(bad_symbol.validate().is_err());
    }

    #[test]
    fn test_new_rejects_bad_shape() {
        assert!(MachineDescriptor::new(2, 2, vec![None; 3]).is_err());
        assert!(matches!(
            MachineDescriptor::new(0, 2, vec![]),
            Err(BeaverError::InvalidClass(_))
        ));
        assert!(matches!(
            MachineDescriptor::new(1, 1, vec![None]),
            Err(BeaverError::InvalidClass(_))
        ));
    }

    #[test]
    fn test_ruleset_hash_is_stable() {
        let hash = champion().ruleset_hash();

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, champion().ruleset_hash());
    }

    #[test]
    fn test_table_view() {
        let view = champion().table_view().to_string();
        let lines: Vec<&str> = view.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("State A  1RB"));
        assert!(lines[2].contains("HALT1"));
    }
}
