//! The decision cycle and the session lifecycle around it.
//!
//! One cycle runs, in order: pause check, daily reset, context build, risk pause evaluation,
//! decision call, parsing, validation, sequencing, size adjustment, execution, and finally
//! journaling. Every cycle leaves exactly one [`DecisionRecord`] in the journal, whether it
//! completes or stops early.

use crate::context::ContextBuilder;
use crate::executor::DecisionExecutor;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use perp_guard_core::{
    AccountRecord, AppConfig, CandidateCoin, Decision, DecisionJournal, DecisionMaker, DecisionRecord,
    ExecutionAdapter, LeverageConfig, MarketDataProvider, FAILURE_MARK,
};
use perp_guard_decision::{
    adjust_open_sizes, build_system_prompt, build_user_prompt, parse_response, sort_by_priority, validate_batch,
    AdjustmentContext, BatchValidationError, LeverageCaps, ParseFailure,
};
use perp_guard_risk::{DrawdownMonitor, MonitorHandle, RiskLimits, RiskTracker};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Cycle records scanned for recent margin failures.
pub const MARGIN_FAILURE_LOOKBACK: usize = 20;

/// Why a cycle stopped before executing its decisions.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("trading paused by risk control, {remaining_minutes} minutes remaining")]
    Paused { remaining_minutes: u64 },

    #[error("failed to build trading context: {0}")]
    ContextBuild(String),

    #[error("decision call failed: {0}")]
    DecisionCall(String),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    Validation(#[from] BatchValidationError),
}

fn remaining_minutes(remaining: Duration) -> u64 {
    remaining.as_secs().div_ceil(60)
}

// =============================================================================
// Trading Session
// =============================================================================

/// One trader: collaborators, risk state, and the cycle counter.
pub struct TradingSession {
    config: AppConfig,
    leverage: RwLock<LeverageConfig>,
    adapter: Arc<dyn ExecutionAdapter>,
    maker: Arc<dyn DecisionMaker>,
    journal: Arc<dyn DecisionJournal>,
    tracker: Arc<RiskTracker>,
    context: ContextBuilder,
    executor: DecisionExecutor,
    cycle: AtomicU64,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for TradingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingSession")
            .field("trader", &self.config.trader.id)
            .field("maker", &self.maker.name())
            .field("cycle", &self.cycle.load(Ordering::Relaxed))
            .field("started_at", &self.started_at)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl TradingSession {
    #[must_use]
    pub fn new(
        config: AppConfig,
        adapter: Arc<dyn ExecutionAdapter>,
        market: Arc<dyn MarketDataProvider>,
        maker: Arc<dyn DecisionMaker>,
        journal: Arc<dyn DecisionJournal>,
    ) -> Self {
        let started_at = Utc::now();
        let tracker = Arc::new(RiskTracker::new(RiskLimits::from(&config.risk), started_at));
        let context = ContextBuilder::new(adapter.clone(), market.clone(), journal.clone(), tracker.clone())
            .with_initial_balance(config.trader.initial_balance)
            .with_performance_window(config.trader.performance_window_cycles);
        let executor = DecisionExecutor::new(adapter.clone(), market, tracker.clone())
            .with_fee_rate(config.trader.taker_fee_rate)
            .with_cross_margin(config.trader.cross_margin);

        Self {
            leverage: RwLock::new(config.leverage),
            config,
            adapter,
            maker,
            journal,
            tracker,
            context,
            executor,
            cycle: AtomicU64::new(0),
            started_at,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<RiskTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cycles started so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Replaces the account pause thresholds from the next cycle on.
    pub fn set_risk_limits(&self, limits: RiskLimits) {
        tracing::info!(
            max_daily_loss_pct = limits.max_daily_loss_pct,
            max_drawdown_pct = limits.max_drawdown_pct,
            pause_secs = limits.pause_duration.as_secs(),
            "Risk limits updated"
        );
        self.tracker.set_limits(limits);
    }

    /// Replaces the per-class leverage caps from the next cycle on.
    pub fn set_leverage_caps(&self, leverage: LeverageConfig) {
        tracing::info!(major = leverage.major, altcoin = leverage.altcoin, "Leverage caps updated");
        *self.leverage.write() = leverage;
    }

    fn candidates(&self) -> Vec<CandidateCoin> {
        self.config
            .trader
            .trading_coins
            .iter()
            .filter(|coin| !coin.trim().is_empty())
            .map(|coin| CandidateCoin::from_coin(coin, "static"))
            .collect()
    }

    async fn persist(&self, record: &DecisionRecord) {
        if let Err(e) = self.journal.record(record.clone()).await {
            tracing::warn!(cycle = record.cycle, error = %e, "Failed to save decision record");
        }
    }

    async fn recent_margin_failure(&self) -> bool {
        match self.journal.recent_records(MARGIN_FAILURE_LOOKBACK).await {
            Ok(records) => records.iter().any(DecisionRecord::mentions_margin_failure),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read recent records, assuming no margin failures");
                false
            }
        }
    }

    /// Runs one decision cycle.
    ///
    /// Per-decision execution failures are noted in the record and do not fail the cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] when the cycle stops before execution: trading is paused, the
    /// context cannot be built, the decision maker fails, or its response does not parse or
    /// validate. The record is journaled in those cases too.
    pub async fn run_cycle(&self) -> Result<DecisionRecord, CycleError> {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let mut record = DecisionRecord::new(cycle, now);
        tracing::info!(cycle, trader = %self.config.trader.id, "Decision cycle started");

        if let Some(remaining) = self.tracker.remaining_pause(now) {
            let err = CycleError::Paused {
                remaining_minutes: remaining_minutes(remaining),
            };
            tracing::info!(cycle, error = %err, "Skipping cycle");
            record.fail(err.to_string());
            self.persist(&record).await;
            return Err(err);
        }

        self.tracker.maybe_daily_reset(now);

        let leverage = *self.leverage.read();
        let built = match self
            .context
            .build(cycle, self.started_at, now, self.candidates(), leverage)
            .await
        {
            Ok(built) => built,
            Err(e) => {
                let err = CycleError::ContextBuild(format!("{e:#}"));
                record.fail(err.to_string());
                self.persist(&record).await;
                return Err(err);
            }
        };
        let ctx = built.context;
        tracing::info!(
            cycle,
            equity = %format!("{:.2}", ctx.account.total_equity),
            available = %format!("{:.2}", ctx.account.available_balance),
            positions = ctx.account.position_count,
            "Account snapshot"
        );

        let pause = self.tracker.check_and_apply_pause(ctx.account.total_equity, now);
        let equity_state = self.tracker.equity_state();
        record.account = AccountRecord {
            snapshot: ctx.account.clone(),
            wallet_balance: built.balance.total_wallet,
            unrealized_pnl: built.balance.unrealized,
            day_start_equity: equity_state.day_start_equity,
            equity_peak: equity_state.equity_peak,
        };
        record.positions = ctx.positions.clone();
        record.candidates = ctx.candidates.clone();

        if pause.triggered() {
            let remaining = self.tracker.remaining_pause(now).unwrap_or_default();
            let minutes = remaining_minutes(remaining);
            record.fail(format!(
                "Risk control triggered: paused for {minutes} minutes (equity={:.2})",
                ctx.account.total_equity
            ));
            self.persist(&record).await;
            return Err(CycleError::Paused {
                remaining_minutes: minutes,
            });
        }

        record.system_prompt = build_system_prompt(ctx.account.total_equity, &leverage, &self.config.prompt);
        record.user_prompt = build_user_prompt(&ctx);
        tracing::debug!(cycle, maker = self.maker.name(), "Requesting decision");

        let raw = match self.maker.decide(&record.system_prompt, &record.user_prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                let err = CycleError::DecisionCall(format!("{e:#}"));
                record.fail(err.to_string());
                self.persist(&record).await;
                return Err(err);
            }
        };

        let parsed = match parse_response(&raw) {
            Ok(parsed) => parsed,
            Err(failure) => {
                record.cot_trace.clone_from(&failure.cot_trace);
                let err = CycleError::Parse(failure);
                record.fail(err.to_string());
                self.persist(&record).await;
                return Err(err);
            }
        };
        record.cot_trace = parsed.cot_trace;
        let mut decisions = parsed.decisions;

        let caps = LeverageCaps::from(&leverage);
        if let Err(e) = validate_batch(&decisions, ctx.account.total_equity, &caps, &ctx.markets) {
            record.decision_json = decisions_json(&decisions);
            let err = CycleError::Validation(e);
            record.fail(err.to_string());
            self.persist(&record).await;
            return Err(err);
        }

        sort_by_priority(&mut decisions);
        let adjustment = AdjustmentContext {
            available: ctx.account.available_balance,
            fee_rate: self.config.trader.taker_fee_rate,
            performance: ctx.performance.as_ref(),
            recent_margin_failure: self.recent_margin_failure().await,
            now,
        };
        for note in adjust_open_sizes(&mut decisions, &adjustment) {
            tracing::info!(cycle, note = %note, "Size adjustment");
            record.note(note);
        }
        record.decision_json = decisions_json(&decisions);

        let order: Vec<String> = decisions
            .iter()
            .map(|d| format!("{} {}", d.symbol, d.action))
            .collect();
        tracing::info!(cycle, order = ?order, "Executing decisions");

        for decision in &decisions {
            let action = self.executor.execute(decision, Utc::now()).await;
            if action.success {
                record.note(format!("✓ {} {} success", decision.symbol, decision.action));
                let pause = self.config.trader.execution_pause;
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            } else {
                record.note(format!(
                    "{FAILURE_MARK} {} {} failed: {}",
                    decision.symbol,
                    decision.action,
                    action.error.as_deref().unwrap_or("unknown error")
                ));
            }
            record.actions.push(action);
        }

        let failed = record.actions.iter().filter(|a| !a.success).count();
        tracing::info!(cycle, executed = record.actions.len(), failed, "Decision cycle completed");
        self.persist(&record).await;
        Ok(record)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the cycle loop and the drawdown monitor.
    ///
    /// The first cycle runs immediately, then one per scan interval; a slow cycle delays the
    /// next tick instead of overlapping it.
    #[must_use]
    pub fn start(self: Arc<Self>) -> SessionHandle {
        let monitor = DrawdownMonitor::new(self.adapter.clone(), self.tracker.clone(), &self.config.risk).spawn();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.trader.scan_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                trader = %self.config.trader.id,
                maker = self.maker.name(),
                interval_secs = interval.as_secs(),
                "Trading session started"
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
                        match self.run_cycle().await {
                            Ok(_) | Err(CycleError::Paused { .. }) => {}
                            Err(e) => tracing::error!(error = %e, "Decision cycle failed"),
                        }
                    }
                }
            }

            tracing::info!(cycles = self.cycles(), "Trading session stopped");
        });

        SessionHandle {
            shutdown_tx,
            task,
            monitor,
        }
    }
}

fn decisions_json(decisions: &[Decision]) -> String {
    serde_json::to_string_pretty(decisions).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize decisions");
        String::new()
    })
}

/// Owner of a running session's background tasks.
pub struct SessionHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    monitor: MonitorHandle,
}

impl SessionHandle {
    /// Signals shutdown and waits for the cycle loop and the monitor to exit.
    ///
    /// A cycle already in flight finishes first.
    ///
    /// # Errors
    ///
    /// Returns an error if either task panicked.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        let loop_result = self.task.await;
        self.monitor.shutdown().await?;
        loop_result?;
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished() && self.monitor.is_finished()
    }
}
