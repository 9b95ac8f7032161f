//! Risk controls for leveraged futures trading.
//!
//! - [`sizing`]: adjusts proposed position sizes by performance, confidence, and margin.
//! - [`pause`]: account-wide pause on daily loss or equity drawdown.
//! - [`tracker`]: the session's shared risk state.
//! - [`monitor`]: background task closing positions after a sustained profit retracement.

pub mod drawdown;
pub mod monitor;
pub mod pause;
pub mod sizing;
pub mod tracker;

pub use drawdown::{position_pnl_pct, BreachVerdict, DrawdownCheck, DrawdownRule};
pub use monitor::{DrawdownMonitor, EmergencyClose, MonitorHandle};
pub use pause::{EquityState, PauseCheck, PauseReason, RiskLimits};
pub use sizing::{adjusted_size, margin_limit};
pub use tracker::RiskTracker;
