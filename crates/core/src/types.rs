use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    /// Upper-case label used by exchange order endpoints (`LONG` / `SHORT`).
    #[must_use]
    pub const fn as_exchange_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Parses `long`/`short` in any case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Self::Long),
            "short" | "sell" => Some(Self::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an open position: one entry per symbol and side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub side: Side,
}

impl PositionKey {
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbol, self.side)
    }
}

/// Wallet figures reported by the execution adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Total wallet balance, excluding unrealized P&L.
    pub total_wallet: f64,
    pub available: f64,
    pub unrealized: f64,
}

impl Balance {
    /// Wallet balance plus unrealized P&L.
    #[must_use]
    pub fn equity(&self) -> f64 {
        self.total_wallet + self.unrealized
    }
}

/// Position as reported by the exchange, before session bookkeeping is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub mark_price: f64,
    /// Signed amount as reported; callers use the absolute value.
    pub quantity: f64,
    /// Zero when the exchange does not report it.
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
}

impl ExchangePosition {
    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.quantity != 0.0
    }
}

/// Account view rebuilt at the start of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_equity: f64,
    pub available_balance: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub margin_used: f64,
    pub margin_used_pct: f64,
    pub position_count: usize,
}

/// Position view enriched with session-tracked peak profit and first-seen time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub mark_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    /// Unrealized P&L relative to margin used.
    pub unrealized_pnl_pct: f64,
    pub peak_pnl_pct: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    pub first_seen: DateTime<Utc>,
}

impl PositionSnapshot {
    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }
}

/// Symbol offered to the decision maker as a possible new trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCoin {
    pub symbol: String,
    pub sources: Vec<String>,
}

impl CandidateCoin {
    /// Builds a candidate from a user-supplied coin name.
    #[must_use]
    pub fn from_coin(coin: &str, source: &str) -> Self {
        Self {
            symbol: normalize_symbol(coin),
            sources: vec![source.to_string()],
        }
    }
}

/// Upper-cases a coin name and appends the `USDT` quote when it is missing.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.ends_with("USDT") {
        symbol
    } else {
        format!("{symbol}USDT")
    }
}

/// Per-symbol market data consumed by validation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    /// 14-period average true range, when the data source computes it.
    pub atr14: Option<f64>,
}

/// A closed trade as reported by the performance collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub side: Side,
    pub pnl_pct: f64,
    pub closed_at: DateTime<Utc>,
}

/// Rolling performance statistics over a trailing number of cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    /// Percentage of winning trades, 0-100.
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub recent_trades: Vec<TradeOutcome>,
}
