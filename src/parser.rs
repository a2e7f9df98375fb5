//! This module provides the parser for machine notation, utilizing the `pest` crate.
//! It turns strings such as `1RB1LB_1LA1RZ` into a `MachineDescriptor`, inferring the
//! number of states from the rows and the number of symbols from the row width.

use crate::machine::MachineDescriptor;
use crate::types::{BeaverError, Direction, NextState, Symbol, Transition, HALT_LABEL};
use pest::{
    error::{Error, ErrorVariant},
    iterators::Pair,
    Parser as PestParser, Span,
};
use pest_derive::Parser as PestParser;

/// Derives a `PestParser` for the notation grammar defined in `grammar.pest`.
#[derive(PestParser)]
#[grammar = "grammar.pest"]
pub struct NotationParser;

/// Parses a machine written in standard text notation.
///
/// The resulting descriptor may still be malformed (for example a `---` entry or a
/// target state beyond the last row); such descriptors are accepted here so that they
/// can be dispatched and classified as errors. Call [`MachineDescriptor::validate`]
/// to reject them up front.
///
/// # Returns
///
/// * `Ok(MachineDescriptor)` if the input is well-formed notation.
/// * `Err(BeaverError::ParseError)` if there are syntax errors or rows of unequal width.
/// * `Err(BeaverError::InvalidClass)` if the inferred class is outside the supported limits.
pub fn parse(input: &str) -> Result<MachineDescriptor, BeaverError> {
    let root = NotationParser::parse(Rule::machine, input.trim())
        .map_err(|e| BeaverError::ParseError(Box::new(e)))?
        .next()
        .ok_or_else(|| BeaverError::ValidationError("Empty machine notation".to_string()))?;

    let mut rows: Vec<Vec<Option<Transition>>> = Vec::new();
    for pair in root.into_inner() {
        if pair.as_rule() != Rule::row {
            continue;
        }

        let span = pair.as_span();
        let row = parse_row(pair)?;

        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(parse_error(
                    &format!(
                        "Row has {} entries but the first row has {}",
                        row.len(),
                        first.len()
                    ),
                    span,
                ));
            }
        }

        rows.push(row);
    }

    let states = rows.len();
    let symbols = rows.first().map_or(0, Vec::len);

    MachineDescriptor::new(states, symbols, rows.concat())
}

/// Parses one state's row of entries from a `Pair<Rule::row>`.
fn parse_row(pair: Pair<Rule>) -> Result<Vec<Option<Transition>>, BeaverError> {
    pair.into_inner()
        .map(|entry| match entry.as_rule() {
            Rule::undefined => Ok(None),
            Rule::transition => parse_transition(entry).map(Some),
            _ => Err(parse_error("Unexpected entry", entry.as_span())),
        })
        .collect()
}

/// Parses a single `<write><move><target>` entry from a `Pair<Rule::transition>`.
fn parse_transition(pair: Pair<Rule>) -> Result<Transition, BeaverError> {
    let span = pair.as_span();
    let mut write: Option<Symbol> = None;
    let mut direction: Option<Direction> = None;
    let mut next: Option<NextState> = None;

    for p in pair.into_inner() {
        let text = p.as_str();
        match p.as_rule() {
            Rule::write => write = text.parse().ok(),
            Rule::move_dir => {
                direction = Some(if text == "L" {
                    Direction::Left
                } else {
                    Direction::Right
                })
            }
            Rule::target => next = text.chars().next().map(parse_target),
            _ => {}
        }
    }

    match (write, direction, next) {
        (Some(write), Some(direction), Some(next)) => Ok(Transition {
            write,
            direction,
            next,
        }),
        _ => Err(parse_error("Incomplete transition", span)),
    }
}

fn parse_target(letter: char) -> NextState {
    if letter == HALT_LABEL {
        NextState::Halt
    } else {
        NextState::State(letter as u8 - b'A')
    }
}

/// Creates a `BeaverError::ParseError` from a message and a `Span`.
fn parse_error(msg: &str, span: Span) -> BeaverError {
    BeaverError::ParseError(Box::new(Error::new_from_span(
        ErrorVariant::CustomError {
            message: msg.to_string(),
        },
        span,
    )))
}
