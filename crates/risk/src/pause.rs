//! Account-wide trading pause on daily loss or equity drawdown.
//!
//! The state machine has two states, active and paused; paused is derived from
//! `now < pause_until`. It is evaluated once per decision cycle with the current equity.

use chrono::{DateTime, TimeDelta, Utc};
use perp_guard_core::RiskConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DAILY_RESET_HOURS: i64 = 24;

/// Thresholds that pause trading. A threshold of zero is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub pause_duration: Duration,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_drawdown_pct: config.max_drawdown_pct,
            pause_duration: config.pause_duration,
        }
    }
}

/// Which limit caused a pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PauseReason {
    DailyLoss { loss_pct: f64, limit_pct: f64 },
    Drawdown { drawdown_pct: f64, limit_pct: f64 },
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLoss { loss_pct, limit_pct } => {
                write!(f, "daily loss {loss_pct:.2}% reached limit {limit_pct:.2}%")
            }
            Self::Drawdown {
                drawdown_pct,
                limit_pct,
            } => write!(f, "drawdown {drawdown_pct:.2}% reached limit {limit_pct:.2}%"),
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PauseCheck {
    pub daily_pnl: f64,
    pub daily_loss_pct: f64,
    pub drawdown_pct: f64,
    /// Limits reached by this evaluation; empty when trading continues.
    pub reasons: Vec<PauseReason>,
    pub pause_until: Option<DateTime<Utc>>,
}

impl PauseCheck {
    #[must_use]
    pub fn triggered(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Equity baselines and pause deadline for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityState {
    /// Zero until the first positive equity observation of the day.
    pub day_start_equity: f64,
    /// Highest equity seen this session. Never decreases.
    pub equity_peak: f64,
    pub daily_pnl: f64,
    pub pause_until: Option<DateTime<Utc>>,
    pub last_reset: DateTime<Utc>,
}

impl EquityState {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day_start_equity: 0.0,
            equity_peak: 0.0,
            daily_pnl: 0.0,
            pause_until: None,
            last_reset: now,
        }
    }

    /// Folds `equity` into the baselines and pauses trading when a limit is reached.
    pub fn observe(&mut self, equity: f64, limits: &RiskLimits, now: DateTime<Utc>) -> PauseCheck {
        if self.day_start_equity <= 0.0 {
            self.day_start_equity = equity;
        }

        self.daily_pnl = equity - self.day_start_equity;
        if equity > self.equity_peak {
            self.equity_peak = equity;
        }

        let daily_loss_pct = if self.daily_pnl < 0.0 && self.day_start_equity > 0.0 {
            -self.daily_pnl / self.day_start_equity * 100.0
        } else {
            0.0
        };
        let drawdown_pct = if equity < self.equity_peak && self.equity_peak > 0.0 {
            (self.equity_peak - equity) / self.equity_peak * 100.0
        } else {
            0.0
        };

        let mut reasons = Vec::new();
        if limits.max_daily_loss_pct > 0.0 && daily_loss_pct >= limits.max_daily_loss_pct {
            reasons.push(PauseReason::DailyLoss {
                loss_pct: daily_loss_pct,
                limit_pct: limits.max_daily_loss_pct,
            });
        }
        if limits.max_drawdown_pct > 0.0 && drawdown_pct >= limits.max_drawdown_pct {
            reasons.push(PauseReason::Drawdown {
                drawdown_pct,
                limit_pct: limits.max_drawdown_pct,
            });
        }

        if !reasons.is_empty() {
            let until = TimeDelta::from_std(limits.pause_duration)
                .ok()
                .and_then(|pause| now.checked_add_signed(pause))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.pause_until = Some(until);
        }

        PauseCheck {
            daily_pnl: self.daily_pnl,
            daily_loss_pct,
            drawdown_pct,
            reasons,
            pause_until: self.pause_until,
        }
    }

    /// Time left in the current pause, `None` when trading is active.
    #[must_use]
    pub fn remaining_pause(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.pause_until?;
        if now < until {
            (until - now).to_std().ok()
        } else {
            None
        }
    }

    /// Starts a new trading day once 24 hours have passed since the last reset.
    ///
    /// Zeroes the daily P&L and clears the day-start equity, so the next observation becomes
    /// the new baseline. Returns whether a reset happened.
    pub fn maybe_daily_reset(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.last_reset < TimeDelta::hours(DAILY_RESET_HOURS) {
            return false;
        }
        self.daily_pnl = 0.0;
        self.day_start_equity = 0.0;
        self.last_reset = now;
        true
    }
}
