//! Per-position profit retracement rules.

use perp_guard_core::{RiskConfig, Side};

/// Leverage assumed when the exchange does not report one.
pub const DEFAULT_LEVERAGE: u32 = 10;

/// Leveraged return of a position in percent.
///
/// Measured from the price move, not from reported unrealized P&L. Returns zero when the
/// entry price is not positive.
#[must_use]
pub fn position_pnl_pct(side: Side, entry_price: f64, mark_price: f64, leverage: u32) -> f64 {
    if entry_price <= 0.0 || !entry_price.is_finite() || !mark_price.is_finite() {
        return 0.0;
    }
    let leverage = if leverage == 0 { DEFAULT_LEVERAGE } else { leverage };
    let move_pct = match side {
        Side::Long => (mark_price - entry_price) / entry_price,
        Side::Short => (entry_price - mark_price) / entry_price,
    };
    move_pct * f64::from(leverage) * 100.0
}

/// Retracement of `current` from `peak`, in percent of the peak.
#[must_use]
pub fn drawdown_from_peak(peak: f64, current: f64) -> f64 {
    if peak > 0.0 && current < peak {
        (peak - current) / peak * 100.0
    } else {
        0.0
    }
}

/// Thresholds for a sustained profit reversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownRule {
    /// The position must still be above this profit (percent).
    pub min_profit_pct: f64,
    /// Retracement from peak (percent) that counts as a breach.
    pub drawdown_pct: f64,
    /// Consecutive breaches before an emergency close.
    pub breach_window: u32,
}

impl Default for DrawdownRule {
    fn default() -> Self {
        Self::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for DrawdownRule {
    fn from(config: &RiskConfig) -> Self {
        Self {
            min_profit_pct: config.monitor_min_profit_pct,
            drawdown_pct: config.monitor_drawdown_pct,
            breach_window: config.breach_window.max(1),
        }
    }
}

impl DrawdownRule {
    #[must_use]
    pub fn is_breach(&self, current_pnl_pct: f64, drawdown_pct: f64) -> bool {
        current_pnl_pct > self.min_profit_pct && drawdown_pct >= self.drawdown_pct
    }
}

/// What the monitor should do with a position after one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachVerdict {
    /// No breach; the counter was reset.
    Clear,
    /// Breach below the required window.
    Breach { consecutive: u32 },
    /// Breach window reached; close the position.
    Close { consecutive: u32 },
}

/// Result of evaluating one position sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownCheck {
    pub current_pnl_pct: f64,
    pub peak_pnl_pct: f64,
    pub drawdown_pct: f64,
    pub verdict: BreachVerdict,
}
