//! Performance-aware resizing of opening decisions.

use chrono::{DateTime, TimeDelta, Utc};
use perp_guard_core::{Decision, PerformanceWindow, Side, TradeOutcome};
use perp_guard_risk::{adjusted_size, margin_limit};

/// Loss at or below which a recent trade puts its symbol and side on cooldown (percent).
pub const COOLDOWN_LOSS_PCT: f64 = -15.0;
pub const COOLDOWN_MINUTES: i64 = 90;
/// Applied when a recent cycle failed for lack of margin.
pub const MARGIN_FAILURE_PENALTY: f64 = 0.85;

const NEUTRAL_WIN_RATE: f64 = 50.0;
const NEUTRAL_PROFIT_FACTOR: f64 = 1.0;
const CLAMP_EPSILON: f64 = 1e-6;

/// Account and history inputs shared by every decision in a batch.
#[derive(Debug, Clone)]
pub struct AdjustmentContext<'a> {
    pub available: f64,
    pub fee_rate: f64,
    pub performance: Option<&'a PerformanceWindow>,
    /// Any of the recent cycle records mentions a margin failure.
    pub recent_margin_failure: bool,
    pub now: DateTime<Utc>,
}

/// Whether the latest closed trade on `symbol`/`side` was a large loss within the cooldown.
///
/// Only the most recent matching trade counts; `trades` are ordered oldest first.
#[must_use]
pub fn has_recent_loss_cooldown(trades: &[TradeOutcome], symbol: &str, side: Side, now: DateTime<Utc>) -> bool {
    trades
        .iter()
        .rev()
        .find(|t| t.symbol == symbol && t.side == side)
        .is_some_and(|t| {
            t.pnl_pct <= COOLDOWN_LOSS_PCT && now.signed_duration_since(t.closed_at) < TimeDelta::minutes(COOLDOWN_MINUTES)
        })
}

/// Resizes every opening decision in place.
///
/// # Returns
///
/// Execution-log notes describing each cooldown, penalty, clamp and size change.
pub fn adjust_open_sizes(decisions: &mut [Decision], ctx: &AdjustmentContext<'_>) -> Vec<String> {
    let mut notes = Vec::new();
    let (win_rate, profit_factor, trades) = ctx.performance.map_or(
        (NEUTRAL_WIN_RATE, NEUTRAL_PROFIT_FACTOR, &[][..]),
        |p| (p.win_rate, p.profit_factor, p.recent_trades.as_slice()),
    );

    for decision in decisions.iter_mut() {
        let Some(side) = decision.action.open_side() else {
            continue;
        };
        let side_label = side.as_str().to_uppercase();

        let cooldown = has_recent_loss_cooldown(trades, &decision.symbol, side, ctx.now);
        if cooldown {
            notes.push(format!(
                "Cooldown applied for {} {side_label} after recent large loss; size reduced",
                decision.symbol
            ));
        }

        let base = decision.position_size_usd.max(0.0);
        let leverage = f64::from(decision.leverage);
        let mut new_size = adjusted_size(
            base,
            leverage,
            ctx.available,
            ctx.fee_rate,
            win_rate,
            profit_factor,
            decision.confidence,
            cooldown,
        );

        if ctx.recent_margin_failure && new_size > 0.0 {
            new_size *= MARGIN_FAILURE_PENALTY;
            notes.push("Recent margin errors detected; preemptively reduced position size".to_string());
        }

        if let Some(limit) = margin_limit(ctx.available, leverage, ctx.fee_rate) {
            if base > 0.0 && new_size > limit - CLAMP_EPSILON {
                notes.push(format!(
                    "Clamped size to avoid margin error; adjusted to {new_size:.2} USD"
                ));
            }
        }

        if base > 0.0 && (new_size - base).abs() > f64::EPSILON {
            notes.push(format!(
                "Adjusted position size {} {side_label}: {base:.2} -> {new_size:.2}",
                decision.symbol
            ));
            tracing::info!(
                symbol = %decision.symbol,
                side = %side,
                from = %format!("{base:.2}"),
                to = %format!("{new_size:.2}"),
                "Adjusted position size"
            );
        }

        decision.position_size_usd = new_size;
    }

    notes
}
