//! Integration tests for the drawdown monitor against a scripted exchange.

use async_trait::async_trait;
use chrono::Utc;
use perp_guard_core::{
    Balance, ExchangePosition, ExecutionAdapter, ExecutionError, OrderAck, PositionKey,
    RiskConfig, Side,
};
use perp_guard_risk::{BreachVerdict, DrawdownMonitor, RiskLimits, RiskTracker};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Default)]
struct ScriptedExchange {
    positions: Mutex<Vec<ExchangePosition>>,
    closes: Mutex<Vec<(String, Side, f64)>>,
    fail_closes: Mutex<bool>,
}

impl ScriptedExchange {
    fn set_mark(&self, mark: f64) {
        for position in self.positions.lock().unwrap().iter_mut() {
            position.mark_price = mark;
        }
    }

    fn closes(&self) -> Vec<(String, Side, f64)> {
        self.closes.lock().unwrap().clone()
    }

    fn record_close(&self, symbol: &str, side: Side, quantity: f64) -> Result<OrderAck, ExecutionError> {
        if *self.fail_closes.lock().unwrap() {
            return Err(ExecutionError::Rejected("exchange busy".to_string()));
        }
        self.closes.lock().unwrap().push((symbol.to_string(), side, quantity));
        self.positions
            .lock()
            .unwrap()
            .retain(|p| !(p.symbol == symbol && p.side == side));
        Ok(OrderAck::default())
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedExchange {
    async fn balance(&self) -> Result<Balance, ExecutionError> {
        Ok(Balance::default())
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ExecutionError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn open_long(&self, _: &str, _: f64, _: u32) -> Result<OrderAck, ExecutionError> {
        unreachable!("monitor never opens")
    }

    async fn open_short(&self, _: &str, _: f64, _: u32) -> Result<OrderAck, ExecutionError> {
        unreachable!("monitor never opens")
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError> {
        self.record_close(symbol, Side::Long, quantity)
    }

    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError> {
        self.record_close(symbol, Side::Short, quantity)
    }

    async fn set_stop_loss(&self, _: &str, _: Side, _: f64, _: f64) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn set_take_profit(&self, _: &str, _: Side, _: f64, _: f64) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn cancel_stop_loss_orders(&self, _: &str, _: Side) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn cancel_take_profit_orders(&self, _: &str, _: Side) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn set_margin_mode(&self, _: &str, _: bool) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Long at 100 with 10x leverage: every 0.1 of mark is 1% of leveraged return.
fn btc_long() -> ExchangePosition {
    ExchangePosition {
        symbol: "BTCUSDT".to_string(),
        side: Side::Long,
        entry_price: 100.0,
        mark_price: 100.0,
        quantity: 0.5,
        leverage: 10,
        unrealized_pnl: 0.0,
        liquidation_price: 91.0,
    }
}

fn setup() -> (Arc<ScriptedExchange>, Arc<RiskTracker>, DrawdownMonitor) {
    let exchange = Arc::new(ScriptedExchange::default());
    exchange.positions.lock().unwrap().push(btc_long());
    let tracker = Arc::new(RiskTracker::new(RiskLimits::default(), Utc::now()));
    let monitor = DrawdownMonitor::new(exchange.clone(), tracker.clone(), &RiskConfig::default());
    (exchange, tracker, monitor)
}

fn btc_key() -> PositionKey {
    PositionKey::new("BTCUSDT", Side::Long)
}

// =============================================================================
// Check Tests
// =============================================================================

#[tokio::test]
async fn test_emergency_close_on_third_breach() {
    let (exchange, tracker, monitor) = setup();

    exchange.set_mark(102.0); // peak 20%
    assert!(monitor.check_once().await.unwrap().is_empty());

    for mark in [101.1, 101.0] {
        exchange.set_mark(mark);
        assert!(monitor.check_once().await.unwrap().is_empty());
        assert!(exchange.closes().is_empty());
    }
    assert_eq!(tracker.breach_count(&btc_key()), 2);

    exchange.set_mark(100.9);
    let closed = monitor.check_once().await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].check.verdict, BreachVerdict::Close { consecutive: 3 });
    assert_eq!(exchange.closes(), vec![("BTCUSDT".to_string(), Side::Long, 0.0)]);
    assert!(tracker.peak_pnl(&btc_key()).is_none());
    assert_eq!(tracker.breach_count(&btc_key()), 0);
}

#[tokio::test]
async fn test_recovery_between_breaches_resets_counter() {
    let (exchange, tracker, monitor) = setup();

    for mark in [102.0, 101.1, 101.0, 101.5, 101.0, 100.9] {
        exchange.set_mark(mark);
        monitor.check_once().await.unwrap();
    }

    assert!(exchange.closes().is_empty());
    assert_eq!(tracker.breach_count(&btc_key()), 2);
}

#[tokio::test]
async fn test_failed_close_keeps_state_and_retries_on_next_breach() {
    let (exchange, tracker, monitor) = setup();
    *exchange.fail_closes.lock().unwrap() = true;

    for mark in [102.0, 101.1, 101.0, 100.9] {
        exchange.set_mark(mark);
        assert!(monitor.check_once().await.unwrap().is_empty());
    }
    assert_eq!(tracker.breach_count(&btc_key()), 3);
    assert!((tracker.peak_pnl(&btc_key()).unwrap() - 20.0).abs() < 1e-9);

    *exchange.fail_closes.lock().unwrap() = false;
    exchange.set_mark(100.8);
    assert_eq!(monitor.check_once().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_externally_closed_position_is_pruned() {
    let (exchange, tracker, monitor) = setup();
    exchange.set_mark(102.0);
    monitor.check_once().await.unwrap();
    assert!(tracker.peak_pnl(&btc_key()).is_some());

    exchange.positions.lock().unwrap().clear();
    monitor.check_once().await.unwrap();
    assert!(tracker.peak_pnl(&btc_key()).is_none());
}

#[tokio::test]
async fn test_losing_position_never_breaches() {
    let (exchange, tracker, monitor) = setup();
    for mark in [100.4, 99.0, 98.0, 97.0, 96.0] {
        exchange.set_mark(mark);
        monitor.check_once().await.unwrap();
    }
    assert!(exchange.closes().is_empty());
    assert_eq!(tracker.breach_count(&btc_key()), 0);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_spawned_monitor_ticks_and_shuts_down() {
    let (exchange, tracker, monitor) = setup();
    exchange.set_mark(102.0);
    tracker.update_peak(&btc_key(), 20.0);
    exchange.set_mark(101.0);

    let handle = monitor.with_interval(Duration::from_secs(60)).spawn();

    // First check fires one interval after start
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(tracker.breach_count(&btc_key()), 0);

    tokio::time::sleep(Duration::from_secs(60 * 3)).await;
    assert_eq!(exchange.closes().len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_joins_idle_monitor() {
    let (_exchange, _tracker, monitor) = setup();
    let handle = monitor.spawn();
    assert!(!handle.is_finished());
    handle.shutdown().await.unwrap();
}
