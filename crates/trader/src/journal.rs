//! In-memory decision journal with rolling trade statistics.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use perp_guard_core::{DecisionJournal, DecisionRecord, PerformanceWindow, TradeOutcome};
use std::collections::VecDeque;

/// Profit factor reported when a window has wins and no losses.
pub const MAX_PROFIT_FACTOR: f64 = 10.0;

#[derive(Debug, Default)]
struct JournalState {
    records: VecDeque<DecisionRecord>,
    trades: VecDeque<TradeOutcome>,
}

/// Bounded journal keeping the latest cycle records and closed trades in memory.
#[derive(Debug)]
pub struct InMemoryJournal {
    capacity: usize,
    state: RwLock<JournalState>,
}

impl InMemoryJournal {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(JournalState::default()),
        }
    }

    /// Adds a closed trade. Trades are expected in closing order.
    pub fn record_trade(&self, outcome: TradeOutcome) {
        let mut state = self.state.write();
        state.trades.push_back(outcome);
        while state.trades.len() > self.capacity {
            state.trades.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent record, if any.
    #[must_use]
    pub fn last_record(&self) -> Option<DecisionRecord> {
        self.state.read().records.back().cloned()
    }
}

/// Win rate, profit factor and per-trade Sharpe of `trades`.
#[must_use]
pub fn summarize(trades: &[TradeOutcome]) -> PerformanceWindow {
    let wins = trades.iter().filter(|t| t.pnl_pct > 0.0).count();
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl_pct > 0.0).map(|t| t.pnl_pct).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl_pct < 0.0).map(|t| -t.pnl_pct).sum();

    #[allow(clippy::cast_precision_loss)]
    let count = trades.len() as f64;

    #[allow(clippy::cast_precision_loss)]
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins as f64 / count * 100.0
    };

    let profit_factor = if gross_loss > 0.0 {
        (gross_profit / gross_loss).min(MAX_PROFIT_FACTOR)
    } else if gross_profit > 0.0 {
        MAX_PROFIT_FACTOR
    } else {
        1.0
    };

    let sharpe_ratio = if trades.len() < 2 {
        0.0
    } else {
        let mean = trades.iter().map(|t| t.pnl_pct).sum::<f64>() / count;
        let variance = trades.iter().map(|t| (t.pnl_pct - mean).powi(2)).sum::<f64>() / (count - 1.0);
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            mean / std_dev
        } else {
            0.0
        }
    };

    PerformanceWindow {
        win_rate,
        profit_factor,
        sharpe_ratio,
        recent_trades: trades.to_vec(),
    }
}

#[async_trait]
impl DecisionJournal for InMemoryJournal {
    async fn record(&self, record: DecisionRecord) -> Result<()> {
        let mut state = self.state.write();
        state.records.push_back(record);
        while state.records.len() > self.capacity {
            state.records.pop_front();
        }
        Ok(())
    }

    async fn recent_records(&self, limit: usize) -> Result<Vec<DecisionRecord>> {
        let state = self.state.read();
        let skip = state.records.len().saturating_sub(limit);
        Ok(state.records.iter().skip(skip).cloned().collect())
    }

    /// Trades closed since the oldest of the last `window_cycles` records. Every trade counts
    /// while fewer records than that exist.
    async fn performance(&self, window_cycles: usize) -> Result<Option<PerformanceWindow>> {
        let state = self.state.read();
        let cutoff = if state.records.len() < window_cycles {
            None
        } else {
            let skip = state.records.len() - window_cycles;
            state.records.iter().nth(skip).map(|r| r.timestamp)
        };

        let trades: Vec<TradeOutcome> = state
            .trades
            .iter()
            .filter(|t| cutoff.map_or(true, |c| t.closed_at >= c))
            .cloned()
            .collect();

        if trades.is_empty() {
            return Ok(None);
        }
        Ok(Some(summarize(&trades)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use perp_guard_core::Side;

    fn trade(pnl_pct: f64, minutes_ago: i64) -> TradeOutcome {
        TradeOutcome {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            pnl_pct,
            closed_at: Utc::now() - TimeDelta::minutes(minutes_ago),
        }
    }

    // ==================== Summary Tests ====================

    #[test]
    fn test_summary_figures() {
        let summary = summarize(&[trade(10.0, 3), trade(-5.0, 2), trade(20.0, 1)]);
        assert!((summary.win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((summary.profit_factor - 6.0).abs() < 1e-9);
        assert!(summary.sharpe_ratio > 0.0);
        assert_eq!(summary.recent_trades.len(), 3);
    }

    #[test]
    fn test_profit_factor_edges() {
        assert!((summarize(&[trade(5.0, 1)]).profit_factor - MAX_PROFIT_FACTOR).abs() < f64::EPSILON);
        assert!((summarize(&[trade(0.0, 1)]).profit_factor - 1.0).abs() < f64::EPSILON);
        assert!((summarize(&[trade(-3.0, 1)]).profit_factor).abs() < f64::EPSILON);
    }

    // ==================== Journal Tests ====================

    #[tokio::test]
    async fn test_records_bounded_newest_last() {
        let journal = InMemoryJournal::new(3);
        for cycle in 1..=5 {
            journal.record(DecisionRecord::new(cycle, Utc::now())).await.unwrap();
        }
        let recent = journal.recent_records(2).await.unwrap();
        let cycles: Vec<u64> = recent.iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![4, 5]);
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.last_record().unwrap().cycle, 5);
    }

    #[tokio::test]
    async fn test_performance_window_uses_record_timestamps() {
        let journal = InMemoryJournal::new(10);
        assert!(journal.performance(10).await.unwrap().is_none());

        journal.record_trade(trade(-8.0, 120));
        journal.record(DecisionRecord::new(1, Utc::now() - TimeDelta::minutes(60))).await.unwrap();
        journal.record(DecisionRecord::new(2, Utc::now() - TimeDelta::minutes(30))).await.unwrap();
        journal.record_trade(trade(12.0, 10));

        // Fewer records than the window: nothing is cut off
        let partial = journal.performance(10).await.unwrap().unwrap();
        assert_eq!(partial.recent_trades.len(), 2);
        assert!((partial.win_rate - 50.0).abs() < f64::EPSILON);

        let window = journal.performance(2).await.unwrap().unwrap();
        assert_eq!(window.recent_trades.len(), 1);
        assert!((window.win_rate - 100.0).abs() < f64::EPSILON);

        let last_only = journal.performance(1).await.unwrap().unwrap();
        assert_eq!(last_only.recent_trades.len(), 1);
    }
}
