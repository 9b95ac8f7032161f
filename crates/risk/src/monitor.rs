//! Background position drawdown monitor.
//!
//! Runs on its own timer, independent of the decision cycle, and closes any position whose
//! profit has retraced from its peak for several consecutive checks.

use crate::drawdown::{position_pnl_pct, BreachVerdict, DrawdownCheck, DrawdownRule};
use crate::tracker::RiskTracker;
use anyhow::Result;
use perp_guard_core::{ExecutionAdapter, ExecutionError, PositionKey, RiskConfig, Side};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Position closed by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyClose {
    pub key: PositionKey,
    pub check: DrawdownCheck,
}

pub struct DrawdownMonitor {
    adapter: Arc<dyn ExecutionAdapter>,
    tracker: Arc<RiskTracker>,
    interval: Duration,
    rule: DrawdownRule,
}

impl DrawdownMonitor {
    #[must_use]
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, tracker: Arc<RiskTracker>, config: &RiskConfig) -> Self {
        Self {
            adapter,
            tracker,
            interval: config.monitor_interval,
            rule: DrawdownRule::from(config),
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: DrawdownRule) -> Self {
        self.rule = rule;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one pass over the live positions.
    ///
    /// # Returns
    ///
    /// The positions closed during this pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the position list cannot be fetched. A failed emergency close is
    /// logged and left for the next breaching check.
    pub async fn check_once(&self) -> Result<Vec<EmergencyClose>> {
        let positions = self.adapter.positions().await?;

        let live: HashSet<PositionKey> = positions
            .iter()
            .filter(|p| p.is_open())
            .map(perp_guard_core::ExchangePosition::key)
            .collect();
        self.tracker.retain_positions(&live);

        let mut closed = Vec::new();
        for position in positions.iter().filter(|p| p.is_open() && p.entry_price > 0.0) {
            let key = position.key();
            let current = position_pnl_pct(
                position.side,
                position.entry_price,
                position.mark_price,
                position.leverage,
            );
            let check = self.tracker.evaluate_drawdown(&key, current, &self.rule);

            match check.verdict {
                BreachVerdict::Clear => {}
                BreachVerdict::Breach { consecutive } => {
                    tracing::warn!(
                        position = %key,
                        current_pnl_pct = %format!("{:.2}", check.current_pnl_pct),
                        peak_pnl_pct = %format!("{:.2}", check.peak_pnl_pct),
                        drawdown_pct = %format!("{:.2}", check.drawdown_pct),
                        consecutive,
                        window = self.rule.breach_window,
                        "Profit retracement breach"
                    );
                }
                BreachVerdict::Close { consecutive } => {
                    tracing::warn!(
                        position = %key,
                        current_pnl_pct = %format!("{:.2}", check.current_pnl_pct),
                        peak_pnl_pct = %format!("{:.2}", check.peak_pnl_pct),
                        drawdown_pct = %format!("{:.2}", check.drawdown_pct),
                        consecutive,
                        "Sustained retracement, emergency closing position"
                    );
                    match self.emergency_close(&key).await {
                        Ok(()) => {
                            self.tracker.clear_position(&key);
                            tracing::info!(position = %key, "Emergency close completed");
                            closed.push(EmergencyClose { key, check });
                        }
                        Err(e) => {
                            tracing::error!(position = %key, error = %e, "Emergency close failed");
                        }
                    }
                }
            }
        }

        Ok(closed)
    }

    async fn emergency_close(&self, key: &PositionKey) -> Result<(), ExecutionError> {
        match key.side {
            Side::Long => self.adapter.close_long(&key.symbol, 0.0).await?,
            Side::Short => self.adapter.close_short(&key.symbol, 0.0).await?,
        };
        Ok(())
    }

    /// Spawns the monitor loop.
    ///
    /// The first check runs one interval after spawning. The loop exits when the returned
    /// handle is shut down or dropped.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = self.interval.as_secs(),
                breach_window = self.rule.breach_window,
                "Drawdown monitor started"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.check_once().await {
                            tracing::warn!(error = %e, "Drawdown check failed");
                        }
                    }
                }
            }

            tracing::info!("Drawdown monitor stopped");
        });

        MonitorHandle { shutdown_tx, task }
    }
}

/// Owner of a running monitor task.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the monitor to stop and waits until its task has exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor task panicked.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.task.await?;
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
