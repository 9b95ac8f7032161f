//! Entry point turning an untrusted model response into decisions plus reasoning.

use crate::error::ParseError;
use crate::extract::extract_decisions;
use crate::reasoning::extract_reasoning;
use perp_guard_core::Decision;
use thiserror::Error;

/// Successfully parsed response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
}

/// Parse failure that still carries whatever reasoning could be recovered, for the record.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("strict JSON parsing failed: {error}")]
pub struct ParseFailure {
    #[source]
    pub error: ParseError,
    pub cot_trace: String,
}

/// Parses a raw model response.
///
/// # Errors
///
/// Returns [`ParseFailure`] when no decision list can be extracted. The reasoning trace is
/// extracted regardless.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ParseFailure> {
    let cot_trace = extract_reasoning(raw);
    match extract_decisions(raw) {
        Ok(decisions) => Ok(ParsedResponse { cot_trace, decisions }),
        Err(error) => Err(ParseFailure { error, cot_trace }),
    }
}
