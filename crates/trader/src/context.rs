//! Builds the per-cycle trading context from the exchange, market data and risk state.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use perp_guard_core::{
    candidate_limit, AccountSnapshot, Balance, CandidateCoin, DecisionJournal, ExchangePosition,
    ExecutionAdapter, LeverageConfig, MarketDataProvider, PositionKey, PositionSnapshot, TradingContext,
};
use perp_guard_risk::drawdown::DEFAULT_LEVERAGE;
use perp_guard_risk::RiskTracker;
use std::collections::HashSet;
use std::sync::Arc;

/// Context plus the raw balance it was derived from.
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub context: TradingContext,
    pub balance: Balance,
}

/// Collaborators and settings needed to assemble a [`TradingContext`].
pub struct ContextBuilder {
    adapter: Arc<dyn ExecutionAdapter>,
    market: Arc<dyn MarketDataProvider>,
    journal: Arc<dyn DecisionJournal>,
    tracker: Arc<RiskTracker>,
    initial_balance: f64,
    performance_window: usize,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        market: Arc<dyn MarketDataProvider>,
        journal: Arc<dyn DecisionJournal>,
        tracker: Arc<RiskTracker>,
    ) -> Self {
        Self {
            adapter,
            market,
            journal,
            tracker,
            initial_balance: 0.0,
            performance_window: 100,
        }
    }

    #[must_use]
    pub fn with_initial_balance(mut self, initial_balance: f64) -> Self {
        self.initial_balance = initial_balance;
        self
    }

    #[must_use]
    pub fn with_performance_window(mut self, cycles: usize) -> Self {
        self.performance_window = cycles;
        self
    }

    /// Snapshot of one open position, enriched with tracked peak and first-seen time.
    fn position_snapshot(&self, position: &ExchangePosition, now: DateTime<Utc>) -> PositionSnapshot {
        let quantity = position.quantity.abs();
        let leverage = if position.leverage == 0 {
            DEFAULT_LEVERAGE
        } else {
            position.leverage
        };
        let margin_used = quantity * position.mark_price / f64::from(leverage);
        let unrealized_pnl_pct = if margin_used > 0.0 {
            position.unrealized_pnl / margin_used * 100.0
        } else {
            0.0
        };
        let key = position.key();

        PositionSnapshot {
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            mark_price: position.mark_price,
            quantity,
            leverage,
            unrealized_pnl: position.unrealized_pnl,
            unrealized_pnl_pct,
            peak_pnl_pct: self.tracker.peak_pnl(&key).unwrap_or(0.0),
            liquidation_price: position.liquidation_price,
            margin_used,
            first_seen: self.tracker.first_seen(&key, now),
        }
    }

    /// Assembles the context for one cycle.
    ///
    /// # Arguments
    ///
    /// * `cycle` - Cycle number, starting at 1
    /// * `started_at` - Session start, for the runtime figure
    /// * `candidates` - Normalized candidate symbols in preference order
    ///
    /// # Errors
    ///
    /// Returns an error when the balance or the position list cannot be fetched. Market data
    /// and performance failures are logged and skipped.
    pub async fn build(
        &self,
        cycle: u64,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        candidates: Vec<CandidateCoin>,
        leverage: LeverageConfig,
    ) -> Result<BuiltContext> {
        let balance = self.adapter.balance().await.context("Failed to fetch balance")?;
        let raw_positions = self.adapter.positions().await.context("Failed to fetch positions")?;

        let positions: Vec<PositionSnapshot> = raw_positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| self.position_snapshot(p, now))
            .collect();

        let live: HashSet<PositionKey> = positions.iter().map(PositionSnapshot::key).collect();
        let pruned = self.tracker.retain_positions(&live);
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "Pruned state of closed positions");
        }

        let total_equity = balance.equity();
        let margin_used: f64 = positions.iter().map(|p| p.margin_used).sum();
        let total_pnl = total_equity - self.initial_balance;
        let account = AccountSnapshot {
            total_equity,
            available_balance: balance.available,
            total_pnl,
            total_pnl_pct: if self.initial_balance > 0.0 {
                total_pnl / self.initial_balance * 100.0
            } else {
                0.0
            },
            margin_used,
            margin_used_pct: if total_equity > 0.0 {
                margin_used / total_equity * 100.0
            } else {
                0.0
            },
            position_count: positions.len(),
        };

        let mut context = TradingContext::new(now, cycle);
        context.runtime_minutes = (now - started_at).num_minutes().max(0);
        context.account = account;
        context.leverage = leverage;
        context.performance = match self.journal.performance(self.performance_window).await {
            Ok(performance) => performance,
            Err(e) => {
                tracing::warn!(error = %e, "Performance analysis failed, continuing without it");
                None
            }
        };

        let held = positions.iter().map(|p| p.symbol.clone());
        let limit = candidate_limit(positions.len());
        let wanted = candidates.iter().take(limit).map(|c| c.symbol.clone());
        let mut seen = HashSet::new();
        for symbol in held.chain(wanted) {
            if !seen.insert(symbol.clone()) {
                continue;
            }
            match self.market.snapshot(&symbol).await {
                Ok(snapshot) => {
                    context.markets.insert(symbol, snapshot);
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Market data unavailable, skipping symbol");
                }
            }
        }

        context.positions = positions;
        context.candidates = candidates;

        Ok(BuiltContext { context, balance })
    }
}
