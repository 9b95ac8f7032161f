//! Decision list extraction as an ordered pipeline of pure strategies.

use crate::error::ParseError;
use crate::sanitize;
use crate::scan;
use perp_guard_core::Decision;
use serde::Deserialize;

/// Both views of a response a strategy may look at.
#[derive(Debug, Clone)]
pub struct ExtractionInput<'a> {
    /// The response exactly as received.
    pub raw: &'a str,
    /// Output of [`sanitize::sanitize`].
    pub sanitized: &'a str,
}

impl<'a> ExtractionInput<'a> {
    #[must_use]
    pub fn new(raw: &'a str, sanitized: &'a str) -> Self {
        Self { raw, sanitized }
    }
}

/// A strategy yields a non-empty list or nothing.
pub type Strategy = fn(&ExtractionInput<'_>) -> Option<Vec<Decision>>;

/// Strategies in the order they are tried.
pub const STRATEGIES: [(&str, Strategy); 4] = [
    ("sanitized_envelope", sanitized_envelope),
    ("raw_decisions_object", raw_decisions_object),
    ("sanitized_array", sanitized_array),
    ("first_balanced_array", first_balanced_array),
];

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    decisions: Vec<Decision>,
}

fn non_empty(decisions: Vec<Decision>) -> Option<Vec<Decision>> {
    (!decisions.is_empty()).then_some(decisions)
}

fn parse_envelope(text: &str) -> Option<Vec<Decision>> {
    serde_json::from_str::<Envelope>(text)
        .ok()
        .and_then(|envelope| non_empty(envelope.decisions))
}

fn parse_array(text: &str) -> Option<Vec<Decision>> {
    serde_json::from_str::<Vec<Decision>>(text).ok().and_then(non_empty)
}

fn sanitized_envelope(input: &ExtractionInput<'_>) -> Option<Vec<Decision>> {
    parse_envelope(input.sanitized)
}

/// Object around `"decisions"` in the unprocessed text.
///
/// Catches responses whose sanitized form picked a different block, e.g. a stray fence with
/// an example in it.
fn raw_decisions_object(input: &ExtractionInput<'_>) -> Option<Vec<Decision>> {
    scan::object_containing_key(input.raw, "decisions").and_then(parse_envelope)
}

fn sanitized_array(input: &ExtractionInput<'_>) -> Option<Vec<Decision>> {
    parse_array(input.sanitized)
}

fn first_balanced_array(input: &ExtractionInput<'_>) -> Option<Vec<Decision>> {
    scan::first_balanced_array(input.sanitized).and_then(parse_array)
}

/// Runs the strategies in order and returns the first non-empty decision list.
///
/// # Errors
///
/// Returns a [`ParseError`] previewing the sanitized text when every strategy fails.
pub fn extract_decisions(raw: &str) -> Result<Vec<Decision>, ParseError> {
    let sanitized = sanitize::sanitize(raw);
    let input = ExtractionInput::new(raw, &sanitized);

    for (name, strategy) in STRATEGIES {
        if let Some(decisions) = strategy(&input) {
            tracing::debug!(strategy = name, count = decisions.len(), "Extracted decisions");
            return Ok(decisions);
        }
    }

    Err(ParseError::from_sanitized(&sanitized))
}
