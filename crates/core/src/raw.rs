//! Decoding of loosely-typed exchange records.
//!
//! Exchange REST payloads arrive as JSON maps whose numbers are sometimes strings
//! (`"positionAmt": "-0.010"`). Adapters call these functions once, at the boundary, so the
//! rest of the pipeline only sees [`Balance`] and [`ExchangePosition`].

use crate::types::{Balance, ExchangePosition, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("unknown position side: {0}")]
    UnknownSide(String),
}

/// Reads a numeric field that may be a JSON number or a decimal string.
///
/// Absent and `null` fields read as zero.
///
/// # Errors
///
/// Returns `DecodeError::NotNumeric` when the field holds a non-numeric string or another
/// JSON type.
pub fn numeric_field(record: &Map<String, Value>, field: &'static str) -> Result<f64, DecodeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| DecodeError::NotNumeric {
            field,
            value: n.to_string(),
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0.0),
        Some(Value::String(s)) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok()
            .and_then(|d| d.to_f64())
            .ok_or_else(|| DecodeError::NotNumeric {
                field,
                value: s.clone(),
            }),
        Some(other) => Err(DecodeError::NotNumeric {
            field,
            value: other.to_string(),
        }),
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, DecodeError> {
    value.as_object().ok_or_else(|| {
        let mut shown = value.to_string();
        shown.truncate(60);
        DecodeError::NotAnObject(shown)
    })
}

/// Decodes a balance record (`totalWalletBalance`, `availableBalance`,
/// `totalUnrealizedProfit`).
///
/// # Errors
///
/// Returns an error if the record is not an object or a field is not numeric.
pub fn decode_balance(value: &Value) -> Result<Balance, DecodeError> {
    let record = as_object(value)?;
    Ok(Balance {
        total_wallet: numeric_field(record, "totalWalletBalance")?,
        available: numeric_field(record, "availableBalance")?,
        unrealized: numeric_field(record, "totalUnrealizedProfit")?,
    })
}

/// Decodes a single position record.
///
/// The side comes from `side` (or `positionSide`); when neither is present it is inferred
/// from the sign of `positionAmt`.
///
/// # Errors
///
/// Returns an error if `symbol` is missing, a numeric field is malformed, or the side is
/// not recognised.
pub fn decode_position(value: &Value) -> Result<ExchangePosition, DecodeError> {
    let record = as_object(value)?;
    let symbol = record
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("symbol"))?
        .to_string();
    let quantity = numeric_field(record, "positionAmt")?;

    let side_text = record
        .get("side")
        .or_else(|| record.get("positionSide"))
        .and_then(Value::as_str);
    let side = match side_text {
        Some(text) if !text.eq_ignore_ascii_case("both") => {
            Side::parse(text).ok_or_else(|| DecodeError::UnknownSide(text.to_string()))?
        }
        _ if quantity < 0.0 => Side::Short,
        _ => Side::Long,
    };

    let leverage = numeric_field(record, "leverage")?;

    Ok(ExchangePosition {
        symbol,
        side,
        entry_price: numeric_field(record, "entryPrice")?,
        mark_price: numeric_field(record, "markPrice")?,
        quantity,
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        leverage: leverage.max(0.0).round() as u32,
        unrealized_pnl: numeric_field(record, "unRealizedProfit")?,
        liquidation_price: numeric_field(record, "liquidationPrice")?,
    })
}

/// Decodes a list of position records.
///
/// # Errors
///
/// Returns the first record's decode error, or `NotAnObject` when `value` is not an array.
pub fn decode_positions(value: &Value) -> Result<Vec<ExchangePosition>, DecodeError> {
    let records = value.as_array().ok_or_else(|| {
        let mut shown = value.to_string();
        shown.truncate(60);
        DecodeError::NotAnObject(shown)
    })?;
    records.iter().map(decode_position).collect()
}
