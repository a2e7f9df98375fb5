//! This module enumerates the canonical machines of a (states, symbols) class in a fixed,
//! reproducible order.
//!
//! Every transition table of a class is numbered as a mixed-radix integer whose digits are
//! its entries, entry `(A, 0)` being the most significant. That number is the table's
//! position. Each digit ranges over the moving transitions (ordered by written symbol, then
//! `L` before `R`, then target state) followed by one halting transition per written symbol.
//! The direction of a halting transition cannot change a run's step or mark count, so it
//! is always `R`.
//!
//! Two tables are equivalent when one becomes the other by renaming non-start states,
//! renaming non-blank symbols, or swapping left and right. Only the table with the smallest
//! position in its equivalence class is emitted, and tables without any halting transition
//! are skipped since they can never halt.

use crate::machine::{check_class, MachineDescriptor};
use crate::source::{Candidate, Source};
use crate::types::{BeaverError, Direction, NextState, StateIndex, Symbol, Transition};

/// Enumerates the canonical machines of one class.
#[derive(Debug, Clone)]
pub struct Enumerator {
    states: usize,
    symbols: usize,
    options: Vec<Transition>,
    space: u64,
    state_perms: Vec<Vec<usize>>,
    symbol_perms: Vec<Vec<usize>>,
}

impl Enumerator {
    /// Creates an enumerator for the class.
    ///
    /// Fails when the class is outside the supported limits or its tables cannot be
    /// numbered within a `u64`.
    pub fn new(states: usize, symbols: usize) -> Result<Self, BeaverError> {
        check_class(states, symbols)?;

        let options = transition_options(states, symbols);
        let entries = (states * symbols) as u32;
        let space = (options.len() as u64).checked_pow(entries).ok_or_else(|| {
            BeaverError::InvalidClass(format!(
                "the {}-state {}-symbol class has more than {} tables",
                states,
                symbols,
                u64::MAX
            ))
        })?;

        Ok(Self {
            states,
            symbols,
            options,
            space,
            state_perms: fixed_start_permutations(states),
            symbol_perms: fixed_start_permutations(symbols),
        })
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    /// Returns the number of positions in the class, canonical or not.
    pub fn space(&self) -> u64 {
        self.space
    }

    /// Returns the first canonical machine at or after `cursor` and the cursor following it.
    pub fn next(&self, cursor: u64) -> Option<(MachineDescriptor, u64)> {
        let position = self.next_position(cursor)?;
        Some((self.descriptor(&self.digits(position)), position + 1))
    }

    /// Iterates the canonical machines from `cursor`, yielding each with its position.
    pub fn iter_from(&self, cursor: u64) -> impl Iterator<Item = (u64, MachineDescriptor)> + '_ {
        let mut cursor = cursor;
        std::iter::from_fn(move || {
            let (descriptor, next) = self.next(cursor)?;
            cursor = next;
            Some((next - 1, descriptor))
        })
    }

    /// Decodes the table at any position, canonical or not.
    pub fn decode(&self, position: u64) -> Result<MachineDescriptor, BeaverError> {
        if position >= self.space {
            return Err(BeaverError::PositionOutOfRange {
                position,
                space: self.space,
            });
        }

        Ok(self.descriptor(&self.digits(position)))
    }

    /// Returns the position of a well-formed machine of this class.
    pub fn encode(&self, machine: &MachineDescriptor) -> Result<u64, BeaverError> {
        Ok(self.position_of(&self.digits_of(machine)?))
    }

    /// Checks whether the table at `position` is emitted by the enumeration.
    pub fn is_canonical(&self, position: u64) -> bool {
        position < self.space && self.is_canonical_digits(&self.digits(position))
    }

    /// Returns the smallest position among the machine's equivalent tables.
    pub fn canonical_position(&self, machine: &MachineDescriptor) -> Result<u64, BeaverError> {
        let digits = self.digits_of(machine)?;
        let smallest = self
            .relabelings(&digits)
            .min()
            .unwrap_or_else(|| digits.clone());

        Ok(self.position_of(&smallest))
    }

    fn next_position(&self, cursor: u64) -> Option<u64> {
        (cursor..self.space).find(|&position| self.is_canonical_digits(&self.digits(position)))
    }

    fn halt_base(&self) -> usize {
        2 * self.states * self.symbols
    }

    fn is_canonical_digits(&self, digits: &[usize]) -> bool {
        let halt_base = self.halt_base();
        if !digits.iter().any(|&d| d >= halt_base) {
            return false;
        }

        self.relabelings(digits)
            .all(|relabeled| relabeled.as_slice() >= digits)
    }

    /// Yields every table equivalent to `digits`, including `digits` itself.
    fn relabelings<'a>(
        &'a self,
        digits: &'a [usize],
    ) -> impl Iterator<Item = Vec<usize>> + 'a {
        self.state_perms.iter().flat_map(move |states| {
            self.symbol_perms.iter().flat_map(move |symbols| {
                [false, true]
                    .into_iter()
                    .map(move |mirror| self.relabel(digits, states, symbols, mirror))
            })
        })
    }

    fn relabel(
        &self,
        digits: &[usize],
        states: &[usize],
        symbols: &[usize],
        mirror: bool,
    ) -> Vec<usize> {
        let mut relabeled = vec![0; digits.len()];

        for (index, &digit) in digits.iter().enumerate() {
            let (state, symbol) = (index / self.symbols, index % self.symbols);
            let t = self.options[digit];

            let next = match t.next {
                NextState::Halt => NextState::Halt,
                NextState::State(n) => NextState::State(states[n as usize] as StateIndex),
            };
            let direction = if mirror && !t.is_halt() {
                t.direction.mirrored()
            } else {
                t.direction
            };
            let mapped = Transition {
                write: symbols[t.write as usize] as Symbol,
                direction,
                next,
            };

            relabeled[states[state] * self.symbols + symbols[symbol]] =
                self.option_index(&mapped);
        }

        relabeled
    }

    fn option_index(&self, t: &Transition) -> usize {
        let write = t.write as usize;
        match t.next {
            NextState::Halt => self.halt_base() + write,
            NextState::State(next) => {
                let direction = match t.direction {
                    Direction::Left => 0,
                    Direction::Right => 1,
                };
                write * 2 * self.states + direction * self.states + next as usize
            }
        }
    }

    fn digits(&self, mut position: u64) -> Vec<usize> {
        let base = self.options.len() as u64;
        let mut digits = vec![0; self.states * self.symbols];

        for digit in digits.iter_mut().rev() {
            *digit = (position % base) as usize;
            position /= base;
        }

        digits
    }

    fn digits_of(&self, machine: &MachineDescriptor) -> Result<Vec<usize>, BeaverError> {
        if machine.states() != self.states || machine.symbols() != self.symbols {
            return Err(BeaverError::InvalidClass(format!(
                "machine {} has {} states and {} symbols, expected {} and {}",
                machine,
                machine.states(),
                machine.symbols(),
                self.states,
                self.symbols
            )));
        }
        machine.validate()?;

        Ok(machine
            .table()
            .iter()
            .flatten()
            .map(|t| self.option_index(t))
            .collect())
    }

    fn position_of(&self, digits: &[usize]) -> u64 {
        let base = self.options.len() as u64;
        digits
            .iter()
            .fold(0u64, |position, &digit| position * base + digit as u64)
    }

    fn descriptor(&self, digits: &[usize]) -> MachineDescriptor {
        MachineDescriptor::from_checked_table(
            self.states,
            self.symbols,
            digits.iter().map(|&d| Some(self.options[d])).collect(),
        )
    }
}

impl Source for Enumerator {
    fn name(&self) -> String {
        format!("s{}_k{}", self.states, self.symbols)
    }

    fn advance(&self, cursor: u64) -> Option<(Candidate, u64)> {
        let position = self.next_position(cursor)?;
        Some((
            Candidate {
                position,
                descriptor: self.descriptor(&self.digits(position)),
            },
            position + 1,
        ))
    }

    fn get(&self, position: u64) -> Result<Candidate, BeaverError> {
        Ok(Candidate {
            position,
            descriptor: self.decode(position)?,
        })
    }
}

/// Lists every transition a table entry can hold, in digit order.
fn transition_options(states: usize, symbols: usize) -> Vec<Transition> {
    let mut options = Vec::with_capacity(symbols * (2 * states + 1));

    for write in 0..symbols {
        for direction in [Direction::Left, Direction::Right] {
            for next in 0..states {
                options.push(Transition::new(write as Symbol, direction, next as StateIndex));
            }
        }
    }

    for write in 0..symbols {
        options.push(Transition::halt(write as Symbol, Direction::Right));
    }

    options
}

/// Returns every permutation of `0..n` that keeps `0` in place.
fn fixed_start_permutations(n: usize) -> Vec<Vec<usize>> {
    fn extend(prefix: &mut Vec<usize>, remaining: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if remaining.is_empty() {
            out.push(prefix.clone());
            return;
        }

        for i in 0..remaining.len() {
            let item = remaining.remove(i);
            prefix.push(item);
            extend(prefix, remaining, out);
            prefix.pop();
            remaining.insert(i, item);
        }
    }

    let mut out = Vec::new();
    extend(&mut vec![0], &mut (1..n).collect(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::collections::HashSet;

    /// Swaps `L` and `R` in every non-halting entry.
    fn mirror_notation(notation: &str) -> String {
        notation
            .split('_')
            .map(|row| {
                row.as_bytes()
                    .chunks(3)
                    .map(|e| {
                        let (write, dir, target) = (e[0] as char, e[1] as char, e[2] as char);
                        let dir = match (target, dir) {
                            ('Z', d) => d,
                            (_, 'L') => 'R',
                            _ => 'L',
                        };
                        format!("{write}{dir}{target}")
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    #[test]
    fn test_invalid_classes_fail_fast() {
        assert!(matches!(Enumerator::new(0, 2), Err(BeaverError::InvalidClass(_))));
        assert!(matches!(Enumerator::new(2, 1), Err(BeaverError::InvalidClass(_))));
        assert!(matches!(Enumerator::new(26, 2), Err(BeaverError::InvalidClass(_))));
        // 30^14 tables do not fit in a u64.
        assert!(matches!(Enumerator::new(7, 2), Err(BeaverError::InvalidClass(_))));
        assert!(Enumerator::new(6, 2).is_ok());
    }

    #[test]
    fn test_space_size() {
        assert_eq!(Enumerator::new(1, 2).unwrap().space(), 6 * 6);
        assert_eq!(Enumerator::new(2, 2).unwrap().space(), 10_000);
        assert_eq!(Enumerator::new(3, 2).unwrap().space(), 14u64.pow(6));
    }

    #[test]
    fn test_decode_first_and_last() {
        let enumerator = Enumerator::new(2, 2).unwrap();

        assert_eq!(enumerator.decode(0).unwrap().notation(), "0LA0LA_0LA0LA");
        assert_eq!(enumerator.decode(9_999).unwrap().notation(), "1RZ1RZ_1RZ1RZ");
        assert!(matches!(
            enumerator.decode(10_000),
            Err(BeaverError::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_inverts_decode() {
        let enumerator = Enumerator::new(3, 2).unwrap();

        for position in [0, 1, 13, 14, 123_456, enumerator.space() - 1] {
            let machine = enumerator.decode(position).unwrap();
            assert_eq!(enumerator.encode(&machine).unwrap(), position);
        }
    }

    #[test]
    fn test_encode_rejects_other_classes_and_malformed() {
        let enumerator = Enumerator::new(2, 2).unwrap();

        assert!(enumerator.encode(&parse("1RA1RZ").unwrap()).is_err());
        assert!(enumerator.encode(&parse("1RB---_1LA1RZ").unwrap()).is_err());
    }

    #[test]
    fn test_mirror_pairs_emit_one_representative() {
        let enumerator = Enumerator::new(2, 2).unwrap();
        let champion = parse("1RB1LB_1LA1RZ").unwrap();
        let mirrored = parse("1LB1RB_1RA1RZ").unwrap();

        let champion_position = enumerator.encode(&champion).unwrap();
        let mirrored_position = enumerator.encode(&mirrored).unwrap();

        assert!(!enumerator.is_canonical(champion_position));
        assert!(enumerator.is_canonical(mirrored_position));
        assert_eq!(
            enumerator.canonical_position(&champion).unwrap(),
            mirrored_position
        );
    }

    #[test]
    fn test_state_relabeling_emits_one_representative() {
        let enumerator = Enumerator::new(3, 2).unwrap();
        let variants = [
            "1RB1RZ_1LB0RC_1LC1LA",
            "1RC1RZ_1LB1LA_1LC0RB",
            "1LB1RZ_1RB0LC_1RC1RA",
            "1LC1RZ_1RB1RA_1RC0LB",
        ];

        let canonical = variants
            .iter()
            .map(|v| enumerator.encode(&parse(v).unwrap()).unwrap())
            .filter(|&position| enumerator.is_canonical(position))
            .count();

        assert_eq!(canonical, 1);
    }

    #[test]
    fn test_every_two_state_class_appears_exactly_once() {
        let enumerator = Enumerator::new(2, 2).unwrap();
        let emitted: HashSet<String> = enumerator
            .iter_from(0)
            .map(|(_, machine)| machine.notation())
            .collect();

        for position in 0..enumerator.space() {
            let machine = enumerator.decode(position).unwrap();
            let notation = machine.notation();
            let mirror = mirror_notation(&notation);

            if !machine.has_halt() {
                assert!(!emitted.contains(&notation));
                continue;
            }

            if notation == mirror {
                assert!(emitted.contains(&notation), "{} not emitted", notation);
            } else {
                let count =
                    emitted.contains(&notation) as usize + emitted.contains(&mirror) as usize;
                assert_eq!(count, 1, "{} and {} emitted {} times", notation, mirror, count);
            }
        }

        assert!(emitted.len() < 10_000);
    }

    #[test]
    fn test_enumeration_is_strictly_ordered() {
        let enumerator = Enumerator::new(2, 2).unwrap();
        let positions: Vec<u64> = enumerator.iter_from(0).map(|(p, _)| p).collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(positions.iter().all(|&p| enumerator.is_canonical(p)));
    }

    #[test]
    fn test_resuming_matches_uninterrupted_traversal() {
        let enumerator = Enumerator::new(2, 2).unwrap();
        let uninterrupted: Vec<(u64, MachineDescriptor)> =
            enumerator.iter_from(0).take(40).collect();

        let mut resumed = Vec::new();
        let mut cursor = 0;
        while resumed.len() < 40 {
            let (machine, next) = enumerator.next(cursor).unwrap();
            resumed.push((next - 1, machine));
            cursor = next;
        }
        assert_eq!(resumed, uninterrupted);

        // Restarting from any intermediate cursor continues the same sequence.
        let (_, cursor) = enumerator.pull(0, 17);
        let (tail, _) = enumerator.pull(cursor, 23);
        let tail: Vec<(u64, MachineDescriptor)> =
            tail.into_iter().map(|c| (c.position, c.descriptor)).collect();
        assert_eq!(tail, uninterrupted[17..]);
    }

    #[test]
    fn test_exhaustion() {
        let enumerator = Enumerator::new(1, 2).unwrap();

        assert!(enumerator.next(enumerator.space()).is_none());
        let all: Vec<_> = enumerator.iter_from(0).collect();
        assert!(!all.is_empty());
        assert!(enumerator.next(all.last().unwrap().0 + 1).is_none());
    }

    #[test]
    fn test_permutations_fix_start() {
        let perms = fixed_start_permutations(3);

        assert_eq!(perms, vec![vec![0, 1, 2], vec![0, 2, 1]]);
        assert_eq!(fixed_start_permutations(1), vec![vec![0]]);
    }
}
