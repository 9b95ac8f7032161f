//! Safety checks on decisions before anything reaches the exchange.
//!
//! Validation is fail-closed: a batch with one invalid decision is discarded as a whole.

use crate::error::{BatchValidationError, ValidationError};
use perp_guard_core::{Action, Decision, LeverageConfig, MarketSnapshot};
use std::collections::HashMap;

// =============================================================================
// Constants
// =============================================================================

pub const MAJOR_SYMBOLS: [&str; 2] = ["BTCUSDT", "ETHUSDT"];

pub const MIN_SIZE_MAJOR_USD: f64 = 60.0;
pub const MIN_SIZE_ALTCOIN_USD: f64 = 12.0;

/// Maximum notional as a multiple of account equity.
pub const MAX_EQUITY_MULTIPLE_MAJOR: f64 = 10.0;
pub const MAX_EQUITY_MULTIPLE_ALTCOIN: f64 = 1.5;
const SIZE_TOLERANCE: f64 = 0.01;

/// Fraction of the stop-to-take span where the synthetic entry sits.
const SYNTHETIC_ENTRY_FRACTION: f64 = 0.2;
const MIN_ATR_MULTIPLE: f64 = 1.0;

const BASE_RISK_REWARD: f64 = 3.0;
const LOW_VOL_RISK_REWARD: f64 = 2.5;
const HIGH_VOL_RISK_REWARD: f64 = 3.5;
const LOW_VOL_THRESHOLD: f64 = 0.01;
const HIGH_VOL_THRESHOLD: f64 = 0.02;

// =============================================================================
// Symbol Classes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Major,
    Altcoin,
}

impl SymbolClass {
    #[must_use]
    pub fn of(symbol: &str) -> Self {
        if MAJOR_SYMBOLS.contains(&symbol) {
            Self::Major
        } else {
            Self::Altcoin
        }
    }

    #[must_use]
    pub const fn min_size(self) -> f64 {
        match self {
            Self::Major => MIN_SIZE_MAJOR_USD,
            Self::Altcoin => MIN_SIZE_ALTCOIN_USD,
        }
    }

    #[must_use]
    pub const fn equity_multiple(self) -> f64 {
        match self {
            Self::Major => MAX_EQUITY_MULTIPLE_MAJOR,
            Self::Altcoin => MAX_EQUITY_MULTIPLE_ALTCOIN,
        }
    }
}

/// Configured leverage ceilings per symbol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeverageCaps {
    pub major: u32,
    pub altcoin: u32,
}

impl LeverageCaps {
    #[must_use]
    pub const fn cap(&self, class: SymbolClass) -> u32 {
        match class {
            SymbolClass::Major => self.major,
            SymbolClass::Altcoin => self.altcoin,
        }
    }
}

impl From<&LeverageConfig> for LeverageCaps {
    fn from(config: &LeverageConfig) -> Self {
        Self {
            major: config.major,
            altcoin: config.altcoin,
        }
    }
}

impl Default for LeverageCaps {
    fn default() -> Self {
        Self::from(&LeverageConfig::default())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Risk/reward geometry of an opening decision around its synthetic entry.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TradeGeometry {
    entry: f64,
    risk_distance: f64,
    reward_distance: f64,
    risk_pct: f64,
    reward_pct: f64,
}

impl TradeGeometry {
    fn new(is_long: bool, stop_loss: f64, take_profit: f64) -> Self {
        let (entry, risk_distance, reward_distance) = if is_long {
            let entry = stop_loss + (take_profit - stop_loss) * SYNTHETIC_ENTRY_FRACTION;
            (entry, entry - stop_loss, take_profit - entry)
        } else {
            let entry = stop_loss - (stop_loss - take_profit) * SYNTHETIC_ENTRY_FRACTION;
            (entry, stop_loss - entry, entry - take_profit)
        };
        Self {
            entry,
            risk_distance,
            reward_distance,
            risk_pct: risk_distance / entry * 100.0,
            reward_pct: reward_distance / entry * 100.0,
        }
    }

    fn risk_reward(&self) -> f64 {
        if self.risk_pct > 0.0 {
            self.reward_pct / self.risk_pct
        } else {
            0.0
        }
    }
}

/// Minimum risk/reward ratio for the market's volatility (ATR relative to price).
#[must_use]
pub fn required_risk_reward(market: Option<&MarketSnapshot>) -> f64 {
    let Some(market) = market else {
        return BASE_RISK_REWARD;
    };
    match market.atr14 {
        Some(atr) if atr > 0.0 && market.current_price > 0.0 => {
            let volatility = atr / market.current_price;
            if volatility < LOW_VOL_THRESHOLD {
                LOW_VOL_RISK_REWARD
            } else if volatility >= HIGH_VOL_THRESHOLD {
                HIGH_VOL_RISK_REWARD
            } else {
                BASE_RISK_REWARD
            }
        }
        _ => BASE_RISK_REWARD,
    }
}

fn validate_open(
    decision: &Decision,
    account_equity: f64,
    caps: &LeverageCaps,
    market: Option<&MarketSnapshot>,
) -> Result<(), ValidationError> {
    let class = SymbolClass::of(&decision.symbol);
    let cap = caps.cap(class);
    let size = decision.position_size_usd;

    if decision.leverage <= 0 || i64::from(decision.leverage) > i64::from(cap) {
        return Err(ValidationError::LeverageOutOfRange {
            symbol: decision.symbol.clone(),
            leverage: decision.leverage,
            cap,
        });
    }
    if size <= 0.0 {
        return Err(ValidationError::NonPositiveSize(size));
    }
    if size < class.min_size() {
        return Err(ValidationError::SizeBelowMinimum {
            symbol: decision.symbol.clone(),
            size,
            min: class.min_size(),
        });
    }

    let max = account_equity * class.equity_multiple();
    if size > max * (1.0 + SIZE_TOLERANCE) {
        return Err(ValidationError::SizeAboveMaximum {
            symbol: decision.symbol.clone(),
            size,
            max,
            multiple: class.equity_multiple(),
        });
    }

    let (stop_loss, take_profit) = (decision.stop_loss, decision.take_profit);
    if stop_loss <= 0.0 || take_profit <= 0.0 {
        return Err(ValidationError::MissingStopOrTake);
    }
    let is_long = decision.action == Action::OpenLong;
    let inverted = if is_long {
        stop_loss >= take_profit
    } else {
        stop_loss <= take_profit
    };
    if inverted {
        return Err(ValidationError::InvertedStopTake {
            side: if is_long { "long" } else { "short" },
            stop_loss,
            take_profit,
        });
    }

    let geometry = TradeGeometry::new(is_long, stop_loss, take_profit);

    if let Some(atr) = market.and_then(|m| m.atr14).filter(|atr| *atr > 0.0) {
        let min_distance = MIN_ATR_MULTIPLE * atr;
        if geometry.risk_distance < min_distance || geometry.reward_distance < min_distance {
            return Err(ValidationError::DistanceBelowAtr { min_distance });
        }
    }

    let required = required_risk_reward(market);
    let ratio = geometry.risk_reward();
    if ratio < required {
        return Err(ValidationError::RiskRewardTooLow {
            ratio,
            required,
            risk_pct: geometry.risk_pct,
            reward_pct: geometry.reward_pct,
        });
    }

    if decision.risk_usd > 0.0 {
        let estimated = geometry.risk_pct / 100.0 * size;
        if estimated > decision.risk_usd {
            return Err(ValidationError::RiskBudgetExceeded {
                estimated,
                budget: decision.risk_usd,
            });
        }
    }

    tracing::trace!(
        symbol = %decision.symbol,
        entry = geometry.entry,
        ratio,
        "Open decision passed validation"
    );
    Ok(())
}

/// Rejects NaN and infinite numeric fields, which compare false against every bound.
fn check_finite(decision: &Decision) -> Result<(), ValidationError> {
    let fields = [
        ("position_size_usd", decision.position_size_usd),
        ("stop_loss", decision.stop_loss),
        ("take_profit", decision.take_profit),
        ("new_stop_loss", decision.new_stop_loss),
        ("new_take_profit", decision.new_take_profit),
        ("close_percentage", decision.close_percentage),
        ("risk_usd", decision.risk_usd),
    ];
    match fields.into_iter().find(|(_, value)| !value.is_finite()) {
        Some((field, value)) => Err(ValidationError::NonFinite { field, value }),
        None => Ok(()),
    }
}

/// Checks one decision against the account and the configured caps.
///
/// # Arguments
///
/// * `account_equity` - Current equity, bounding the notional of new positions
/// * `market` - Snapshot for the decision's symbol; enables ATR-based checks when it has ATR
///
/// # Errors
///
/// Returns the first [`ValidationError`] the decision trips.
pub fn validate_decision(
    decision: &Decision,
    account_equity: f64,
    caps: &LeverageCaps,
    market: Option<&MarketSnapshot>,
) -> Result<(), ValidationError> {
    check_finite(decision)?;
    match &decision.action {
        Action::OpenLong | Action::OpenShort => validate_open(decision, account_equity, caps, market),
        Action::UpdateStopLoss if decision.new_stop_loss <= 0.0 => Err(ValidationError::NonPositiveLevel {
            field: "new_stop_loss",
            value: decision.new_stop_loss,
        }),
        Action::UpdateTakeProfit if decision.new_take_profit <= 0.0 => Err(ValidationError::NonPositiveLevel {
            field: "new_take_profit",
            value: decision.new_take_profit,
        }),
        Action::PartialClose if decision.close_percentage <= 0.0 || decision.close_percentage > 100.0 => {
            Err(ValidationError::ClosePercentageOutOfRange(decision.close_percentage))
        }
        Action::Unknown(_) => Err(ValidationError::InvalidAction(decision.action.clone())),
        _ => Ok(()),
    }
}

/// Validates a batch in order and reports the first failure.
///
/// # Errors
///
/// Returns [`BatchValidationError`] carrying the failing index.
pub fn validate_batch(
    decisions: &[Decision],
    account_equity: f64,
    caps: &LeverageCaps,
    markets: &HashMap<String, MarketSnapshot>,
) -> Result<(), BatchValidationError> {
    for (index, decision) in decisions.iter().enumerate() {
        validate_decision(decision, account_equity, caps, markets.get(&decision.symbol))
            .map_err(|source| BatchValidationError { index, source })?;
    }
    Ok(())
}
