//! Parse CLI command.
//!
//! Runs the response parser on a saved model response and prints the recovered reasoning and
//! decisions as JSON.

use anyhow::{Context, Result};
use clap::Args;
use perp_guard_decision::{parse_response, sort_by_priority, ParsedResponse};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    /// File holding the raw response; reads stdin when omitted
    pub file: Option<PathBuf>,

    /// Order decisions by execution priority
    #[arg(long)]
    pub sorted: bool,
}

pub(crate) fn render(parsed: &ParsedResponse) -> Value {
    json!({
        "cot_trace": parsed.cot_trace,
        "decisions": parsed.decisions,
    })
}

/// Runs the parse command.
///
/// # Errors
/// Returns an error if the input cannot be read or the response does not parse.
pub fn run_parse(args: &ParseArgs) -> Result<()> {
    let raw = super::read_input(args.file.as_deref())?;

    let mut parsed = match parse_response(&raw) {
        Ok(parsed) => parsed,
        Err(failure) => {
            if !failure.cot_trace.is_empty() {
                eprintln!("Reasoning recovered:\n{}", failure.cot_trace);
            }
            return Err(failure.into());
        }
    };
    if args.sorted {
        sort_by_priority(&mut parsed.decisions);
    }

    tracing::info!(decisions = parsed.decisions.len(), "Response parsed");
    let output = serde_json::to_string_pretty(&render(&parsed)).context("Failed to render decisions")?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_shape() {
        let parsed = parse_response(
            "<reasoning>flat</reasoning><decision>[{\"symbol\":\"ETHUSDT\",\"action\":\"wait\"}]</decision>",
        )
        .unwrap();
        let value = render(&parsed);
        assert_eq!(value["cot_trace"], "flat");
        assert_eq!(value["decisions"][0]["action"], "wait");
        assert!(value["decisions"][0].get("leverage").is_none());
    }
}
