//! Decision types produced by the response parser and consumed by execution.

use crate::types::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action requested by the decision maker.
///
/// Unrecognized strings are kept as [`Action::Unknown`] so that parsing succeeds and the
/// validator is the one rejecting them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    UpdateStopLoss,
    UpdateTakeProfit,
    PartialClose,
    Hold,
    Wait,
    Unknown(String),
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
            Self::UpdateStopLoss => "update_stop_loss",
            Self::UpdateTakeProfit => "update_take_profit",
            Self::PartialClose => "partial_close",
            Self::Hold => "hold",
            Self::Wait => "wait",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }

    /// Side an opening action would take, `None` for everything else.
    #[must_use]
    pub const fn open_side(&self) -> Option<Side> {
        match self {
            Self::OpenLong => Some(Side::Long),
            Self::OpenShort => Some(Side::Short),
            _ => None,
        }
    }

    /// Execution priority; lower runs first.
    ///
    /// Capital is released (closes) before stops move, and both happen before new
    /// capital is committed.
    #[must_use]
    pub const fn priority(&self) -> u32 {
        match self {
            Self::CloseLong | Self::CloseShort | Self::PartialClose => 1,
            Self::UpdateStopLoss | Self::UpdateTakeProfit => 2,
            Self::OpenLong | Self::OpenShort => 3,
            Self::Hold | Self::Wait => 4,
            Self::Unknown(_) => 999,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "open_long" => Self::OpenLong,
            "open_short" => Self::OpenShort,
            "close_long" => Self::CloseLong,
            "close_short" => Self::CloseShort,
            "update_stop_loss" => Self::UpdateStopLoss,
            "update_take_profit" => Self::UpdateTakeProfit,
            "partial_close" => Self::PartialClose,
            "hold" => Self::Hold,
            "wait" => Self::Wait,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

/// One instruction from the decision maker.
///
/// Fields that do not apply to the action are left at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub action: Action,

    #[serde(default, deserialize_with = "lenient::int", skip_serializing_if = "is_zero_i32")]
    pub leverage: i32,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub position_size_usd: f64,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub stop_loss: f64,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub take_profit: f64,

    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub new_stop_loss: f64,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub new_take_profit: f64,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub close_percentage: f64,

    #[serde(default, deserialize_with = "lenient::int", skip_serializing_if = "is_zero_i32")]
    pub confidence: i32,
    #[serde(default, deserialize_with = "lenient::float", skip_serializing_if = "is_zero_f64")]
    pub risk_usd: f64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub reasoning: String,
}

impl Decision {
    #[must_use]
    pub fn new(symbol: impl Into<String>, action: impl Into<Action>) -> Self {
        Self {
            symbol: symbol.into(),
            action: action.into(),
            ..Self::default()
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i32(value: &i32) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

/// Complete output of one decision round, prompts included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullDecision {
    pub system_prompt: String,
    pub user_prompt: String,
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Tolerant field decoders for model-produced JSON.
///
/// Models routinely emit `"5"` for `5`, `75.0` for an integer, or `null` for an absent
/// value. Each of those is accepted; anything else is a type error.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn float<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(0.0),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| D::Error::custom(format!("number out of range: {n}"))),
            Some(Value::String(s)) => parse_numeric(&s).map_err(D::Error::custom),
            Some(other) => Err(D::Error::custom(format!("expected number, got {other}"))),
        }
    }

    pub fn int<'de, D>(deserializer: D) -> Result<i32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = float(deserializer)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(value.round() as i32)
    }

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Ok(other.to_string()),
        }
    }

    fn parse_numeric(raw: &str) -> Result<f64, String> {
        let trimmed = raw.trim().trim_end_matches('%').trim();
        if trimmed.is_empty() {
            return Ok(0.0);
        }
        trimmed
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("expected finite numeric string, got {raw:?}"))
    }
}
