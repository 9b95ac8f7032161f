//! From untrusted model text to an ordered, validated, resized decision batch.
//!
//! The parser never trusts the response format: [`sanitize`] and [`scan`] recover a JSON
//! payload from prose, fences, tags and full-width punctuation, and [`extract`] tries a fixed
//! list of strategies before giving up. Validated batches are then ordered by the
//! [`sequencer`] and resized by the [`adjuster`].

pub mod adjuster;
pub mod error;
pub mod extract;
pub mod parser;
pub mod prompt;
pub mod reasoning;
pub mod sanitize;
pub mod scan;
pub mod sequencer;
pub mod validator;

pub use adjuster::{adjust_open_sizes, has_recent_loss_cooldown, AdjustmentContext};
pub use error::{BatchValidationError, ParseError, ValidationError};
pub use extract::extract_decisions;
pub use parser::{parse_response, ParseFailure, ParsedResponse};
pub use prompt::{build_system_prompt, build_user_prompt};
pub use reasoning::extract_reasoning;
pub use sequencer::{sort_by_priority, sorted_by_priority};
pub use validator::{validate_batch, validate_decision, LeverageCaps, SymbolClass};
