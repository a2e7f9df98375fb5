//! This module lets an external heuristic decide the dispatch order within a batch.

use crate::machine::MachineDescriptor;
use crate::source::Candidate;

/// Rates how promising a machine looks. Higher scores are simulated first.
pub trait Scorer: Send {
    fn score(&mut self, machine: &MachineDescriptor) -> f64;
}

impl<F> Scorer for F
where
    F: FnMut(&MachineDescriptor) -> f64 + Send,
{
    fn score(&mut self, machine: &MachineDescriptor) -> f64 {
        self(machine)
    }
}

/// Reorders a batch by descending score. Equal scores keep their enumeration order and
/// `NaN` sorts last.
pub fn prioritize(batch: Vec<Candidate>, scorer: &mut dyn Scorer) -> Vec<Candidate> {
    let mut scored: Vec<(f64, Candidate)> = batch
        .into_iter()
        .map(|candidate| {
            let score = scorer.score(&candidate.descriptor);
            let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
            (score, candidate)
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, candidate)| candidate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn batch(notations: &[&str]) -> Vec<Candidate> {
        notations
            .iter()
            .enumerate()
            .map(|(i, n)| Candidate {
                position: i as u64,
                descriptor: parse(n).unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_orders_by_descending_score() {
        let mut halts = |m: &MachineDescriptor| {
            m.table().iter().flatten().filter(|t| t.is_halt()).count() as f64
        };

        let ordered = prioritize(batch(&["1RA1RA", "1RZ1RZ", "1RA1RZ"]), &mut halts);
        let positions: Vec<u64> = ordered.iter().map(|c| c.position).collect();

        assert_eq!(positions, vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_are_stable_and_nan_is_last() {
        let mut calls = 0;
        let mut scorer = |_: &MachineDescriptor| {
            calls += 1;
            if calls == 2 {
                f64::NAN
            } else {
                1.0
            }
        };

        let ordered = prioritize(batch(&["1RZ0LA", "1RZ0LA", "1RZ0LA", "1RZ0LA"]), &mut scorer);
        let positions: Vec<u64> = ordered.iter().map(|c| c.position).collect();

        assert_eq!(positions, vec![0, 2, 3, 1]);
    }
}
