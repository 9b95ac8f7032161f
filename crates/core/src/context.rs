//! Per-cycle view handed to the prompt builder and the validator.

use crate::config::LeverageConfig;
use crate::types::{AccountSnapshot, CandidateCoin, MarketSnapshot, PerformanceWindow, PositionSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Candidate limits by number of open positions: 0, 1, 2, and 3 or more.
pub const CANDIDATE_LIMITS: [usize; 4] = [30, 25, 20, 15];

/// How many candidates get market data fetched given `open_positions`.
#[must_use]
pub fn candidate_limit(open_positions: usize) -> usize {
    CANDIDATE_LIMITS[open_positions.min(CANDIDATE_LIMITS.len() - 1)]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingContext {
    pub current_time: DateTime<Utc>,
    pub cycle: u64,
    pub runtime_minutes: i64,
    pub account: AccountSnapshot,
    pub positions: Vec<PositionSnapshot>,
    pub candidates: Vec<CandidateCoin>,
    /// Snapshots for held symbols and the first candidates, keyed by symbol.
    pub markets: HashMap<String, MarketSnapshot>,
    pub performance: Option<PerformanceWindow>,
    pub leverage: LeverageConfig,
}

impl TradingContext {
    #[must_use]
    pub fn new(current_time: DateTime<Utc>, cycle: u64) -> Self {
        Self {
            current_time,
            cycle,
            runtime_minutes: 0,
            account: AccountSnapshot::default(),
            positions: Vec::new(),
            candidates: Vec::new(),
            markets: HashMap::new(),
            performance: None,
            leverage: LeverageConfig::default(),
        }
    }

    /// Candidates with market data, in candidate order.
    pub fn candidates_with_market(&self) -> impl Iterator<Item = (&CandidateCoin, &MarketSnapshot)> {
        self.candidates
            .iter()
            .filter_map(|coin| self.markets.get(&coin.symbol).map(|market| (coin, market)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_limit_shrinks_with_positions() {
        assert_eq!(candidate_limit(0), 30);
        assert_eq!(candidate_limit(1), 25);
        assert_eq!(candidate_limit(2), 20);
        assert_eq!(candidate_limit(3), 15);
        assert_eq!(candidate_limit(12), 15);
    }

    #[test]
    fn test_candidates_without_market_are_skipped() {
        let mut ctx = TradingContext::new(Utc::now(), 1);
        ctx.candidates = vec![CandidateCoin::from_coin("btc", "static"), CandidateCoin::from_coin("doge", "static")];
        ctx.markets.insert(
            "DOGEUSDT".to_string(),
            MarketSnapshot {
                symbol: "DOGEUSDT".to_string(),
                current_price: 0.1,
                atr14: None,
            },
        );
        let listed: Vec<&str> = ctx.candidates_with_market().map(|(c, _)| c.symbol.as_str()).collect();
        assert_eq!(listed, vec!["DOGEUSDT"]);
    }
}
