//! Session-wide risk state shared by the decision cycle and the drawdown monitor.

use crate::drawdown::{drawdown_from_peak, BreachVerdict, DrawdownCheck, DrawdownRule};
use crate::pause::{EquityState, PauseCheck, RiskLimits};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use perp_guard_core::PositionKey;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

// =============================================================================
// Position State
// =============================================================================

#[derive(Debug, Default)]
struct PositionState {
    /// Highest leveraged return seen per open position (ratchet).
    peak_pnl: HashMap<PositionKey, f64>,
    /// Consecutive breaching monitor checks per position.
    breaches: HashMap<PositionKey, u32>,
    first_seen: HashMap<PositionKey, DateTime<Utc>>,
}

// =============================================================================
// Risk Tracker
// =============================================================================

/// Owned risk state for one trading session.
///
/// Interior locking with `parking_lot::RwLock`: reads share, writes are exclusive, and no
/// guard escapes a method, so no lock is ever held across an exchange call.
pub struct RiskTracker {
    limits: RwLock<RiskLimits>,
    equity: RwLock<EquityState>,
    positions: RwLock<PositionState>,
}

impl std::fmt::Debug for RiskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let equity = self.equity.read();
        let positions = self.positions.read();
        f.debug_struct("RiskTracker")
            .field("limits", &*self.limits.read())
            .field("day_start_equity", &equity.day_start_equity)
            .field("equity_peak", &equity.equity_peak)
            .field("pause_until", &equity.pause_until)
            .field("tracked_positions", &positions.first_seen.len())
            .finish()
    }
}

impl RiskTracker {
    #[must_use]
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits: RwLock::new(limits),
            equity: RwLock::new(EquityState::new(now)),
            positions: RwLock::new(PositionState::default()),
        }
    }

    #[must_use]
    pub fn limits(&self) -> RiskLimits {
        *self.limits.read()
    }

    /// Replaces the pause thresholds. Takes effect on the next evaluation; a pause already in
    /// force keeps its deadline.
    pub fn set_limits(&self, limits: RiskLimits) {
        *self.limits.write() = limits;
    }

    // ---- account level ----

    /// Evaluates the pause limits against `equity` and arms the pause when one is reached.
    pub fn check_and_apply_pause(&self, equity: f64, now: DateTime<Utc>) -> PauseCheck {
        let limits = self.limits();
        let check = self.equity.write().observe(equity, &limits, now);

        for reason in &check.reasons {
            tracing::warn!(
                reason = %reason,
                equity = %format!("{equity:.2}"),
                pause_secs = limits.pause_duration.as_secs(),
                "Risk limit reached, pausing trading"
            );
        }
        check
    }

    #[must_use]
    pub fn remaining_pause(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.equity.read().remaining_pause(now)
    }

    #[must_use]
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.remaining_pause(now).is_some()
    }

    /// Starts a new trading day when 24 hours have passed since the last one.
    pub fn maybe_daily_reset(&self, now: DateTime<Utc>) -> bool {
        let reset = self.equity.write().maybe_daily_reset(now);
        if reset {
            tracing::info!("Daily P&L reset, day-start equity rebases on next cycle");
        }
        reset
    }

    #[must_use]
    pub fn equity_state(&self) -> EquityState {
        self.equity.read().clone()
    }

    // ---- position level ----

    /// First time `key` was observed, registering `now` when it is new.
    pub fn first_seen(&self, key: &PositionKey, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(seen) = self.positions.read().first_seen.get(key) {
            return *seen;
        }
        *self
            .positions
            .write()
            .first_seen
            .entry(key.clone())
            .or_insert(now)
    }

    /// Records that this session just opened `key`.
    pub fn mark_opened(&self, key: PositionKey, now: DateTime<Utc>) {
        self.positions.write().first_seen.insert(key, now);
    }

    /// Drops all state for positions not in `live`.
    ///
    /// Returns the keys that were removed.
    pub fn retain_positions(&self, live: &HashSet<PositionKey>) -> Vec<PositionKey> {
        let mut state = self.positions.write();
        let stale: Vec<PositionKey> = state
            .first_seen
            .keys()
            .chain(state.peak_pnl.keys())
            .chain(state.breaches.keys())
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for key in &stale {
            state.first_seen.remove(key);
            state.peak_pnl.remove(key);
            state.breaches.remove(key);
        }
        stale
    }

    #[must_use]
    pub fn peak_pnl(&self, key: &PositionKey) -> Option<f64> {
        self.positions.read().peak_pnl.get(key).copied()
    }

    #[must_use]
    pub fn breach_count(&self, key: &PositionKey) -> u32 {
        self.positions.read().breaches.get(key).copied().unwrap_or(0)
    }

    /// Ratchets the peak for `key` and returns it.
    pub fn update_peak(&self, key: &PositionKey, current_pnl_pct: f64) -> f64 {
        let mut state = self.positions.write();
        let peak = state
            .peak_pnl
            .entry(key.clone())
            .or_insert(current_pnl_pct);
        if current_pnl_pct > *peak {
            *peak = current_pnl_pct;
        }
        *peak
    }

    /// Folds one monitor sample into the peak and breach counter.
    ///
    /// Peak update and counter change happen under one exclusive lock.
    pub fn evaluate_drawdown(&self, key: &PositionKey, current_pnl_pct: f64, rule: &DrawdownRule) -> DrawdownCheck {
        let mut state = self.positions.write();

        let peak = state
            .peak_pnl
            .entry(key.clone())
            .or_insert(current_pnl_pct);
        if current_pnl_pct > *peak {
            *peak = current_pnl_pct;
        }
        let peak_pnl_pct = *peak;
        let drawdown_pct = drawdown_from_peak(peak_pnl_pct, current_pnl_pct);

        let verdict = if rule.is_breach(current_pnl_pct, drawdown_pct) {
            let count = state.breaches.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count >= rule.breach_window {
                BreachVerdict::Close { consecutive: *count }
            } else {
                BreachVerdict::Breach { consecutive: *count }
            }
        } else {
            state.breaches.insert(key.clone(), 0);
            BreachVerdict::Clear
        };

        DrawdownCheck {
            current_pnl_pct,
            peak_pnl_pct,
            drawdown_pct,
            verdict,
        }
    }

    /// Forgets the peak and breach counter of a closed position.
    pub fn clear_position(&self, key: &PositionKey) {
        let mut state = self.positions.write();
        state.peak_pnl.remove(key);
        state.breaches.remove(key);
    }
}
