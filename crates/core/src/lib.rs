pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod context;
pub mod decision;
pub mod error;
pub mod raw;
pub mod record;
pub mod traits;
pub mod types;

pub use config::{AppConfig, LeverageConfig, PromptConfig, RiskConfig, TraderConfig};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use context::{candidate_limit, TradingContext};
pub use decision::{Action, Decision, FullDecision};
pub use error::ExecutionError;
pub use record::{AccountRecord, ActionRecord, DecisionRecord, FAILURE_MARK};
pub use traits::{DecisionJournal, DecisionMaker, ExecutionAdapter, MarketDataProvider, OrderAck};
pub use types::{
    normalize_symbol, AccountSnapshot, Balance, CandidateCoin, ExchangePosition, MarketSnapshot,
    PerformanceWindow, PositionKey, PositionSnapshot, Side, TradeOutcome,
};
