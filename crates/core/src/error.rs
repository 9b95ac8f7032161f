use crate::types::Side;
use thiserror::Error;

/// Failure of a single exchange operation.
///
/// Scoped to one decision: the session records it and moves on to the next decision.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("{symbol} already has an open {side} position, close it before opening again")]
    PositionExists { symbol: String, side: Side },

    #[error("no open position for {symbol}")]
    PositionNotFound { symbol: String },

    #[error(
        "insufficient margin: need {required:.2} USDT (margin {margin:.2} + fee {fee:.2}), available {available:.2} USDT"
    )]
    InsufficientMargin {
        required: f64,
        margin: f64,
        fee: f64,
        available: f64,
    },

    #[error("invalid price for {symbol}: {reason}")]
    InvalidPrice { symbol: String, reason: String },

    #[error("market data unavailable for {symbol}: {reason}")]
    MarketData { symbol: String, reason: String },

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("exchange rejected order: {0}")]
    Rejected(String),

    #[error("exchange request failed: {0}")]
    Transport(String),
}

/// Creates a rejection error from any displayable exchange message.
pub fn rejected(message: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::Rejected(message.to_string())
}

/// Creates a transport error from any displayable cause.
pub fn transport(cause: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::Transport(cause.to_string())
}

impl ExecutionError {
    /// True for failures caused by insufficient balance, including exchange-side rejections
    /// that mention margin.
    #[must_use]
    pub fn is_margin_related(&self) -> bool {
        match self {
            Self::InsufficientMargin { .. } => true,
            Self::Rejected(msg) | Self::Transport(msg) => msg.to_ascii_lowercase().contains("margin"),
            _ => false,
        }
    }
}
