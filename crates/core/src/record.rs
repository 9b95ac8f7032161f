use crate::decision::Action;
use crate::types::{AccountSnapshot, CandidateCoin, PositionSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Leading mark of an execution-log line reporting a failed decision.
pub const FAILURE_MARK: char = '✗';

/// Outcome of executing one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub symbol: String,
    pub quantity: f64,
    pub leverage: i32,
    pub price: f64,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionRecord {
    #[must_use]
    pub fn new(action: Action, symbol: impl Into<String>, leverage: i32, timestamp: DateTime<Utc>) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            quantity: 0.0,
            leverage,
            price: 0.0,
            order_id: None,
            timestamp,
            success: false,
            error: None,
        }
    }
}

/// Account state at the time of a cycle, including the risk baselines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(flatten)]
    pub snapshot: AccountSnapshot,
    pub wallet_balance: f64,
    pub unrealized_pnl: f64,
    pub day_start_equity: f64,
    pub equity_peak: f64,
}

/// Everything a single decision cycle saw and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub account: AccountRecord,
    pub positions: Vec<PositionSnapshot>,
    pub candidates: Vec<CandidateCoin>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub cot_trace: String,
    /// Pretty-printed decisions after sequencing and sizing adjustment.
    pub decision_json: String,
    pub actions: Vec<ActionRecord>,
    /// Human-readable notes: adjustments, skipped steps, per-decision failures.
    pub execution_log: Vec<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl DecisionRecord {
    #[must_use]
    pub fn new(cycle: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            cycle,
            timestamp,
            account: AccountRecord::default(),
            positions: Vec::new(),
            candidates: Vec::new(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: String::new(),
            actions: Vec::new(),
            execution_log: Vec::new(),
            success: true,
            error_message: None,
        }
    }

    /// Marks the cycle failed with `message`.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = Some(message.into());
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.execution_log.push(line.into());
    }

    /// True when a failed action, or a failure line of the execution log, mentions margin.
    ///
    /// Sizing notes in the log are ignored even when they talk about margin.
    #[must_use]
    pub fn mentions_margin_failure(&self) -> bool {
        let mentions_margin = |text: &str| text.to_ascii_lowercase().contains("margin");
        let in_log = self
            .execution_log
            .iter()
            .any(|line| line.trim_start().starts_with(FAILURE_MARK) && mentions_margin(line));
        let in_actions = self
            .actions
            .iter()
            .filter(|action| !action.success)
            .any(|action| action.error.as_deref().is_some_and(mentions_margin));
        in_log || in_actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_margin_failure() {
        let now = Utc::now();
        let mut record = DecisionRecord::new(1, now);
        assert!(!record.mentions_margin_failure());

        let mut action = ActionRecord::new(Action::OpenLong, "BTCUSDT", 5, now);
        action.error = Some("insufficient Margin: need 120".to_string());
        record.actions.push(action);
        assert!(record.mentions_margin_failure());

        let mut other = DecisionRecord::new(2, now);
        other.note("✗ SOLUSDT open_long failed: MARGIN is insufficient");
        assert!(other.mentions_margin_failure());
    }

    #[test]
    fn test_sizing_notes_are_not_margin_failures() {
        let now = Utc::now();
        let mut record = DecisionRecord::new(3, now);
        record.note("Recent margin errors detected; preemptively reduced position size");
        record.note("Clamped size to avoid margin error; adjusted to 180.00 USD");
        record.note("✓ BTCUSDT open_long success");
        record.actions.push(ActionRecord::new(Action::OpenLong, "BTCUSDT", 5, now));
        assert!(!record.mentions_margin_failure());
    }

    #[test]
    fn test_fail_sets_flags() {
        let mut record = DecisionRecord::new(7, Utc::now());
        record.fail("boom");
        assert!(!record.success);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }
}
