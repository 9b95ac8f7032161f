//! Position size adjustment.
//!
//! Scales the size proposed by the decision maker by recent performance, stated confidence,
//! and loss cooldown, then keeps the result inside what the available balance can margin.

/// Largest increase over the proposed size (ratio).
pub const MAX_SIZE_RATIO: f64 = 1.25;
/// Largest decrease from the proposed size (ratio).
pub const MIN_SIZE_RATIO: f64 = 0.50;
/// Fraction of the margin limit below which no compression applies.
pub const MARGIN_SAFETY_FACTOR: f64 = 0.92;

const COOLDOWN_MULTIPLIER: f64 = 0.60;
const COMPRESSION_STEEPNESS: f64 = 12.0;
const COMPRESSION_MIDPOINT: f64 = 0.95;

/// Multiplier from rolling win rate (percent) and profit factor.
///
/// Tiers are exclusive and checked strongest first.
#[must_use]
pub fn performance_multiplier(win_rate: f64, profit_factor: f64) -> f64 {
    if win_rate >= 60.0 && profit_factor >= 1.50 {
        1.10
    } else if win_rate >= 55.0 && profit_factor >= 1.30 {
        1.05
    } else if win_rate < 45.0 || profit_factor < 1.00 {
        0.65
    } else {
        1.00
    }
}

/// Multiplier from the decision's confidence (0-100). Zero means "not stated".
#[must_use]
pub fn confidence_multiplier(confidence: i32) -> f64 {
    match confidence {
        c if c <= 0 => 1.0,
        c if c < 50 => 0.75,
        c if c < 60 => 0.85,
        _ => 1.0,
    }
}

/// Largest notional the available balance can open, covering margin plus taker fee.
///
/// Returns `None` when leverage or balance is not positive.
#[must_use]
pub fn margin_limit(available: f64, leverage: f64, fee_rate: f64) -> Option<f64> {
    if leverage <= 0.0 || available <= 0.0 {
        return None;
    }
    let limit = available / (1.0 / leverage + fee_rate.max(0.0));
    (limit.is_finite() && limit > 0.0).then_some(limit)
}

/// Computes the adjusted USD size for an opening decision.
///
/// # Arguments
///
/// * `base` - Size proposed by the decision maker; `<= 0` is returned unchanged
/// * `leverage` - Leverage of the order
/// * `available` - Available balance in USD
/// * `fee_rate` - Taker fee rate (e.g. `0.0004`)
/// * `win_rate` - Rolling win rate, percent
/// * `profit_factor` - Rolling gross profit over gross loss
/// * `confidence` - Decision confidence, 0 when not stated
/// * `recent_loss_cooldown` - A recent large loss on the same symbol and side
///
/// # Returns
///
/// The adjusted size, never negative. The ratio to `base` stays within
/// [`MIN_SIZE_RATIO`, `MAX_SIZE_RATIO`] unless the margin limit forces it lower, and the
/// result never exceeds the margin limit.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn adjusted_size(
    base: f64,
    leverage: f64,
    available: f64,
    fee_rate: f64,
    win_rate: f64,
    profit_factor: f64,
    confidence: i32,
    recent_loss_cooldown: bool,
) -> f64 {
    if base <= 0.0 || !base.is_finite() {
        return base;
    }

    let mut multiplier = performance_multiplier(win_rate, profit_factor);
    multiplier *= confidence_multiplier(confidence);
    if recent_loss_cooldown {
        multiplier *= COOLDOWN_MULTIPLIER;
    }

    let ratio = (base * multiplier / base).clamp(MIN_SIZE_RATIO, MAX_SIZE_RATIO);
    let mut size = base * ratio;

    if let Some(limit) = margin_limit(available, leverage, fee_rate) {
        if size > limit * MARGIN_SAFETY_FACTOR {
            size = limit * margin_compression(size / limit);
        }
        size = size.min(limit);
    }

    size.max(0.0)
}

/// Logistic compression toward 92-100% of the hard limit.
fn margin_compression(ratio: f64) -> f64 {
    MARGIN_SAFETY_FACTOR
        + (1.0 - MARGIN_SAFETY_FACTOR)
            / (1.0 + (COMPRESSION_STEEPNESS * (ratio - COMPRESSION_MIDPOINT)).exp())
}
