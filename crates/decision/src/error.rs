use perp_guard_core::Action;
use thiserror::Error;

/// Number of characters of sanitized output kept in a [`ParseError`].
pub const PREVIEW_CHARS: usize = 160;

/// No extraction strategy produced a non-empty decision list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected JSON object with 'decisions' or bare array; got unparsable content (preview): {preview}")]
pub struct ParseError {
    pub preview: String,
}

impl ParseError {
    /// Builds the error from the sanitized text, truncated on a character boundary.
    #[must_use]
    pub fn from_sanitized(sanitized: &str) -> Self {
        let preview = if sanitized.chars().count() > PREVIEW_CHARS {
            let head: String = sanitized.chars().take(PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            sanitized.to_string()
        };
        Self { preview }
    }
}

/// A single decision failing its safety checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid action: {0}")]
    InvalidAction(Action),

    #[error("leverage must be within 1-{cap} ({symbol}, config cap {cap}x): {leverage}")]
    LeverageOutOfRange { symbol: String, leverage: i32, cap: u32 },

    #[error("{field} must be a finite number: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("position_size_usd must be > 0: {0:.2}")]
    NonPositiveSize(f64),

    #[error("{symbol} position_size_usd too small ({size:.2}), must be >= {min:.2} USDT")]
    SizeBelowMinimum { symbol: String, size: f64, min: f64 },

    #[error("{symbol} position notional cannot exceed {max:.0} USDT ({multiple}x equity), got {size:.0}")]
    SizeAboveMaximum {
        symbol: String,
        size: f64,
        max: f64,
        multiple: f64,
    },

    #[error("stop_loss and take_profit must be > 0")]
    MissingStopOrTake,

    #[error("for {side}, stop_loss {stop_loss} is on the wrong side of take_profit {take_profit}")]
    InvertedStopTake {
        side: &'static str,
        stop_loss: f64,
        take_profit: f64,
    },

    #[error("SL/TP distances must be >= {min_distance:.2} (>= 1.0x ATR14)")]
    DistanceBelowAtr { min_distance: f64 },

    #[error(
        "risk-reward ratio too low ({ratio:.2}:1), required >= {required:.1}:1 \
         [risk={risk_pct:.2}% reward={reward_pct:.2}%]"
    )]
    RiskRewardTooLow {
        ratio: f64,
        required: f64,
        risk_pct: f64,
        reward_pct: f64,
    },

    #[error("estimated risk ({estimated:.2} USDT) exceeds risk_usd budget ({budget:.2} USDT)")]
    RiskBudgetExceeded { estimated: f64, budget: f64 },

    #[error("{field} must be > 0: {value:.2}")]
    NonPositiveLevel { field: &'static str, value: f64 },

    #[error("close_percentage must be in (0,100]: {0:.1}")]
    ClosePercentageOutOfRange(f64),
}

/// First failing decision of a batch. The whole batch is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Decision #{} failed validation: {source}", .index + 1)]
pub struct BatchValidationError {
    /// Zero-based position in the batch.
    pub index: usize,
    #[source]
    pub source: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncated_to_160_chars() {
        let long = "x".repeat(400);
        let err = ParseError::from_sanitized(&long);
        assert_eq!(err.preview.len(), PREVIEW_CHARS + 3);
        assert!(err.preview.ends_with("..."));
        assert!(err.to_string().contains("unparsable content"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "决".repeat(200);
        let err = ParseError::from_sanitized(&text);
        assert_eq!(err.preview.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(ParseError::from_sanitized("short").preview, "short");
    }

    #[test]
    fn test_batch_error_is_one_based() {
        let err = BatchValidationError {
            index: 1,
            source: ValidationError::ClosePercentageOutOfRange(150.0),
        };
        assert_eq!(
            err.to_string(),
            "Decision #2 failed validation: close_percentage must be in (0,100]: 150.0"
        );
    }
}
