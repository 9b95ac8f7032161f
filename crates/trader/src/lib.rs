//! Trading session runtime.
//!
//! Wires the collaborator seams from `perp-guard-core` to the parser, validator and adjuster of
//! `perp-guard-decision` and the risk controls of `perp-guard-risk`. [`PaperExchange`],
//! [`InMemoryJournal`] and [`ScriptedDecisionMaker`] make a complete offline session.

pub mod context;
pub mod executor;
pub mod journal;
pub mod paper;
pub mod scripted;
pub mod session;

pub use context::{BuiltContext, ContextBuilder};
pub use executor::DecisionExecutor;
pub use journal::InMemoryJournal;
pub use paper::PaperExchange;
pub use scripted::ScriptedDecisionMaker;
pub use session::{CycleError, SessionHandle, TradingSession};
