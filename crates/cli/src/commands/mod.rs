//! CLI commands for the decision governance pipeline.

pub mod paper;
pub mod parse;
pub mod size;
pub mod validate;

pub use paper::{run_paper, PaperArgs};
pub use parse::{run_parse, ParseArgs};
pub use size::{run_size, SizeArgs};
pub use validate::{run_validate, ValidateArgs};

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

/// Reads a model response from `path`, or from stdin when no path is given or it is `-`.
pub(crate) fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read response from stdin")?;
            Ok(raw)
        }
    }
}
