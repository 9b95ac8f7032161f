use crate::error::ExecutionError;
use crate::record::DecisionRecord;
use crate::types::{Balance, ExchangePosition, MarketSnapshot, PerformanceWindow, Side};
use anyhow::Result;
use async_trait::async_trait;

/// Acknowledgement of a submitted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: Option<String>,
}

/// Account queries and order placement on a futures exchange.
///
/// Implementations decode their wire records into typed values before returning (see
/// [`crate::raw`]). No method retries; retry policy belongs to the implementation.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn balance(&self) -> Result<Balance, ExecutionError>;

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ExecutionError>;

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck, ExecutionError>;

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck, ExecutionError>;

    /// Closes `quantity` of the long position; zero closes all of it.
    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError>;

    /// Closes `quantity` of the short position; zero closes all of it.
    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError>;

    async fn set_stop_loss(&self, symbol: &str, side: Side, quantity: f64, price: f64) -> Result<(), ExecutionError>;

    async fn set_take_profit(&self, symbol: &str, side: Side, quantity: f64, price: f64) -> Result<(), ExecutionError>;

    async fn cancel_stop_loss_orders(&self, symbol: &str, side: Side) -> Result<(), ExecutionError>;

    async fn cancel_take_profit_orders(&self, symbol: &str, side: Side) -> Result<(), ExecutionError>;

    async fn set_margin_mode(&self, symbol: &str, cross: bool) -> Result<(), ExecutionError>;
}

/// External service producing a free-text trading recommendation.
///
/// The returned text is untrusted and goes through the response parser.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Current price and volatility per symbol.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

/// Stores cycle records and serves rolling performance statistics.
#[async_trait]
pub trait DecisionJournal: Send + Sync {
    /// Persists one cycle record.
    async fn record(&self, record: DecisionRecord) -> Result<()>;

    /// Most recent records, newest last, at most `limit` of them.
    async fn recent_records(&self, limit: usize) -> Result<Vec<DecisionRecord>>;

    /// Performance over the trailing `window_cycles`; `None` when there is no history yet.
    async fn performance(&self, window_cycles: usize) -> Result<Option<PerformanceWindow>>;
}
