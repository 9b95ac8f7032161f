//! Executes sequenced decisions against the exchange, one at a time.

use chrono::{DateTime, Utc};
use perp_guard_core::{
    Action, ActionRecord, Decision, ExchangePosition, ExecutionAdapter, ExecutionError, MarketDataProvider,
    PositionKey, Side,
};
use perp_guard_risk::RiskTracker;
use std::sync::Arc;

/// Turns a validated decision into exchange calls and an [`ActionRecord`].
pub struct DecisionExecutor {
    adapter: Arc<dyn ExecutionAdapter>,
    market: Arc<dyn MarketDataProvider>,
    tracker: Arc<RiskTracker>,
    fee_rate: f64,
    cross_margin: bool,
}

impl DecisionExecutor {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        market: Arc<dyn MarketDataProvider>,
        tracker: Arc<RiskTracker>,
    ) -> Self {
        Self {
            adapter,
            market,
            tracker,
            fee_rate: 0.0004,
            cross_margin: true,
        }
    }

    #[must_use]
    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    #[must_use]
    pub fn with_cross_margin(mut self, cross: bool) -> Self {
        self.cross_margin = cross;
        self
    }

    /// Executes one decision.
    ///
    /// Never fails: the outcome, including any error, is carried by the returned record.
    pub async fn execute(&self, decision: &Decision, now: DateTime<Utc>) -> ActionRecord {
        let mut record = ActionRecord::new(decision.action.clone(), decision.symbol.clone(), decision.leverage, now);
        match self.dispatch(decision, &mut record, now).await {
            Ok(()) => record.success = true,
            Err(e) => {
                tracing::warn!(
                    symbol = %decision.symbol,
                    action = %decision.action,
                    error = %e,
                    "Decision execution failed"
                );
                record.error = Some(e.to_string());
            }
        }
        record
    }

    async fn dispatch(
        &self,
        decision: &Decision,
        record: &mut ActionRecord,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        match &decision.action {
            Action::OpenLong => self.open(decision, Side::Long, record, now).await,
            Action::OpenShort => self.open(decision, Side::Short, record, now).await,
            Action::CloseLong => self.close(decision, Side::Long, record).await,
            Action::CloseShort => self.close(decision, Side::Short, record).await,
            Action::UpdateStopLoss => self.update_level(decision, Level::StopLoss, record).await,
            Action::UpdateTakeProfit => self.update_level(decision, Level::TakeProfit, record).await,
            Action::PartialClose => self.partial_close(decision, record).await,
            Action::Hold | Action::Wait => Ok(()),
            Action::Unknown(raw) => Err(ExecutionError::UnsupportedAction(raw.clone())),
        }
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, ExecutionError> {
        let snapshot = self
            .market
            .snapshot(symbol)
            .await
            .map_err(|e| ExecutionError::MarketData {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;
        if snapshot.current_price > 0.0 {
            Ok(snapshot.current_price)
        } else {
            Err(ExecutionError::InvalidPrice {
                symbol: symbol.to_string(),
                reason: format!("non-positive current price {}", snapshot.current_price),
            })
        }
    }

    async fn open(
        &self,
        decision: &Decision,
        side: Side,
        record: &mut ActionRecord,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        let symbol = decision.symbol.as_str();

        // A failed position query does not block the open
        if let Ok(positions) = self.adapter.positions().await {
            if positions.iter().any(|p| p.symbol == symbol && p.side == side && p.is_open()) {
                return Err(ExecutionError::PositionExists {
                    symbol: symbol.to_string(),
                    side,
                });
            }
        }

        let price = self.current_price(symbol).await?;
        let quantity = decision.position_size_usd / price;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "invalid position size {}",
                decision.position_size_usd
            )));
        }
        record.quantity = quantity;
        record.price = price;

        let leverage = u32::try_from(decision.leverage)
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| ExecutionError::Rejected(format!("invalid leverage {}", decision.leverage)))?;
        let margin = decision.position_size_usd / f64::from(leverage);
        let fee = decision.position_size_usd * self.fee_rate;
        let available = self.adapter.balance().await?.available;
        if margin + fee > available {
            return Err(ExecutionError::InsufficientMargin {
                required: margin + fee,
                margin,
                fee,
                available,
            });
        }

        if let Err(e) = self.adapter.set_margin_mode(symbol, self.cross_margin).await {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to set margin mode, continuing");
        }

        let ack = match side {
            Side::Long => self.adapter.open_long(symbol, quantity, leverage).await?,
            Side::Short => self.adapter.open_short(symbol, quantity, leverage).await?,
        };
        record.order_id = ack.order_id;
        self.tracker.mark_opened(PositionKey::new(symbol, side), now);
        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %format!("{quantity:.4}"),
            price,
            leverage,
            "Position opened"
        );

        if let Err(e) = self
            .adapter
            .set_stop_loss(symbol, side, quantity, decision.stop_loss)
            .await
        {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to place stop loss");
        }
        if let Err(e) = self
            .adapter
            .set_take_profit(symbol, side, quantity, decision.take_profit)
            .await
        {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to place take profit");
        }

        Ok(())
    }

    async fn close(&self, decision: &Decision, side: Side, record: &mut ActionRecord) -> Result<(), ExecutionError> {
        let symbol = decision.symbol.as_str();
        record.price = self.current_price(symbol).await?;
        let ack = match side {
            Side::Long => self.adapter.close_long(symbol, 0.0).await?,
            Side::Short => self.adapter.close_short(symbol, 0.0).await?,
        };
        record.order_id = ack.order_id;
        tracing::info!(symbol = %symbol, side = %side, "Position closed");
        Ok(())
    }

    /// First open position on `symbol` plus every open position there.
    async fn locate(&self, symbol: &str) -> Result<(ExchangePosition, Vec<ExchangePosition>), ExecutionError> {
        let positions: Vec<ExchangePosition> = self
            .adapter
            .positions()
            .await?
            .into_iter()
            .filter(|p| p.symbol == symbol && p.is_open())
            .collect();
        let target = positions
            .first()
            .cloned()
            .ok_or_else(|| ExecutionError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok((target, positions))
    }

    async fn update_level(&self, decision: &Decision, level: Level, record: &mut ActionRecord) -> Result<(), ExecutionError> {
        let symbol = decision.symbol.as_str();
        let price = self.current_price(symbol).await?;
        record.price = price;

        let (target, on_symbol) = self.locate(symbol).await?;
        let side = target.side;
        let new_level = match level {
            Level::StopLoss => decision.new_stop_loss,
            Level::TakeProfit => decision.new_take_profit,
        };
        level.check(symbol, side, price, new_level)?;

        if on_symbol.iter().any(|p| p.side != side) {
            tracing::warn!(
                symbol = %symbol,
                side = %side,
                "Hedged positions on symbol, cancelling orders may affect both sides"
            );
        }

        let quantity = target.quantity.abs();
        match level {
            Level::StopLoss => {
                if let Err(e) = self.adapter.cancel_stop_loss_orders(symbol, side).await {
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to cancel previous stop loss");
                }
                self.adapter.set_stop_loss(symbol, side, quantity, new_level).await?;
            }
            Level::TakeProfit => {
                if let Err(e) = self.adapter.cancel_take_profit_orders(symbol, side).await {
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to cancel previous take profit");
                }
                self.adapter.set_take_profit(symbol, side, quantity, new_level).await?;
            }
        }
        tracing::info!(symbol = %symbol, level = level.label(), new_level, price, "Protective order moved");
        Ok(())
    }

    async fn partial_close(&self, decision: &Decision, record: &mut ActionRecord) -> Result<(), ExecutionError> {
        let symbol = decision.symbol.as_str();
        if decision.close_percentage <= 0.0 || decision.close_percentage > 100.0 {
            return Err(ExecutionError::Rejected(format!(
                "close percentage must be within (0, 100]: {:.1}",
                decision.close_percentage
            )));
        }
        record.price = self.current_price(symbol).await?;

        let (target, _) = self.locate(symbol).await?;
        let quantity = target.quantity.abs() * decision.close_percentage / 100.0;
        record.quantity = quantity;

        let ack = match target.side {
            Side::Long => self.adapter.close_long(symbol, quantity).await?,
            Side::Short => self.adapter.close_short(symbol, quantity).await?,
        };
        record.order_id = ack.order_id;
        tracing::info!(
            symbol = %symbol,
            side = %target.side,
            pct = decision.close_percentage,
            quantity = %format!("{quantity:.4}"),
            "Position partially closed"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    StopLoss,
    TakeProfit,
}

impl Level {
    const fn label(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }

    /// Stops sit on the losing side of the current price, takes on the winning side.
    fn check(self, symbol: &str, side: Side, price: f64, level: f64) -> Result<(), ExecutionError> {
        let below = matches!((self, side), (Self::StopLoss, Side::Long) | (Self::TakeProfit, Side::Short));
        let valid = if below { level < price } else { level > price };
        if valid {
            return Ok(());
        }
        Err(ExecutionError::InvalidPrice {
            symbol: symbol.to_string(),
            reason: format!(
                "{side} {} must be {} current price (current {price:.2}, new {level:.2})",
                self.label(),
                if below { "below" } else { "above" }
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperExchange;
    use perp_guard_risk::RiskLimits;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<PaperExchange>, Arc<RiskTracker>, DecisionExecutor) {
        let exchange = Arc::new(PaperExchange::new(dec!(1000)));
        exchange.set_price("BTCUSDT", dec!(100));
        let tracker = Arc::new(RiskTracker::new(RiskLimits::default(), Utc::now()));
        let executor = DecisionExecutor::new(exchange.clone(), exchange.clone(), tracker.clone());
        (exchange, tracker, executor)
    }

    fn open_long(size: f64) -> Decision {
        Decision {
            leverage: 5,
            position_size_usd: size,
            stop_loss: 95.0,
            take_profit: 120.0,
            ..Decision::new("BTCUSDT", Action::OpenLong)
        }
    }

    // ==================== Open Tests ====================

    #[tokio::test]
    async fn test_open_rejects_non_finite_size() {
        let (exchange, _, executor) = setup();
        let record = executor.execute(&open_long(f64::NAN), Utc::now()).await;

        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("exchange rejected order: invalid position size NaN"));
        assert!(exchange.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_places_orders_and_stamps_first_seen() {
        let (exchange, tracker, executor) = setup();
        let now = Utc::now();
        let record = executor.execute(&open_long(500.0), now).await;

        assert!(record.success, "{:?}", record.error);
        assert!((record.quantity - 5.0).abs() < 1e-9);
        assert!((record.price - 100.0).abs() < 1e-9);
        assert!(record.order_id.is_some());
        assert_eq!(exchange.stop_loss("BTCUSDT", Side::Long), Some(dec!(95)));
        assert_eq!(exchange.take_profit("BTCUSDT", Side::Long), Some(dec!(120)));
        assert_eq!(exchange.margin_mode("BTCUSDT"), Some(true));

        let later = now + chrono::TimeDelta::minutes(3);
        assert_eq!(tracker.first_seen(&PositionKey::new("BTCUSDT", Side::Long), later), now);
    }

    #[tokio::test]
    async fn test_open_rejects_existing_same_side() {
        let (_exchange, _tracker, executor) = setup();
        assert!(executor.execute(&open_long(200.0), Utc::now()).await.success);

        let second = executor.execute(&open_long(200.0), Utc::now()).await;
        assert!(!second.success);
        assert!(second.error.unwrap().contains("already has an open long position"));
    }

    #[tokio::test]
    async fn test_open_margin_precheck() {
        let (exchange, _tracker, executor) = setup();
        // 5000 / 5 = 1000 margin + 2 fee > 1000 available
        let record = executor.execute(&open_long(5000.0), Utc::now()).await;
        assert!(!record.success);
        assert!(record.error.unwrap().starts_with("insufficient margin"));
        assert!(exchange.positions().await.unwrap().is_empty());
    }

    // ==================== Close Tests ====================

    #[tokio::test]
    async fn test_close_and_partial_close() {
        let (exchange, _tracker, executor) = setup();
        exchange.open_position("BTCUSDT", Side::Short, dec!(4), 5).unwrap();

        let partial = Decision {
            close_percentage: 25.0,
            ..Decision::new("BTCUSDT", Action::PartialClose)
        };
        let record = executor.execute(&partial, Utc::now()).await;
        assert!(record.success);
        assert!((record.quantity - 1.0).abs() < 1e-9);
        let remaining = exchange.positions().await.unwrap();
        assert!((remaining[0].quantity + 3.0).abs() < 1e-9);

        let record = executor.execute(&Decision::new("BTCUSDT", Action::CloseShort), Utc::now()).await;
        assert!(record.success);
        assert!(exchange.positions().await.unwrap().is_empty());

        let missing = executor.execute(&Decision::new("BTCUSDT", Action::CloseLong), Utc::now()).await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_partial_close_percentage_bounds() {
        let (exchange, _tracker, executor) = setup();
        exchange.open_position("BTCUSDT", Side::Long, dec!(1), 5).unwrap();
        let decision = Decision {
            close_percentage: 150.0,
            ..Decision::new("BTCUSDT", Action::PartialClose)
        };
        assert!(!executor.execute(&decision, Utc::now()).await.success);
    }

    // ==================== Protective Order Tests ====================

    #[tokio::test]
    async fn test_update_stop_loss_checks_side_of_price() {
        let (exchange, _tracker, executor) = setup();
        exchange.open_position("BTCUSDT", Side::Long, dec!(1), 5).unwrap();

        let wrong = Decision {
            new_stop_loss: 105.0,
            ..Decision::new("BTCUSDT", Action::UpdateStopLoss)
        };
        let record = executor.execute(&wrong, Utc::now()).await;
        assert!(!record.success);
        assert!(record.error.unwrap().contains("must be below current price"));

        let right = Decision {
            new_stop_loss: 98.0,
            ..Decision::new("BTCUSDT", Action::UpdateStopLoss)
        };
        assert!(executor.execute(&right, Utc::now()).await.success);
        assert_eq!(exchange.stop_loss("BTCUSDT", Side::Long), Some(dec!(98)));
    }

    #[tokio::test]
    async fn test_update_take_profit_on_short() {
        let (exchange, _tracker, executor) = setup();
        exchange.open_position("BTCUSDT", Side::Short, dec!(1), 5).unwrap();

        let decision = Decision {
            new_take_profit: 90.0,
            ..Decision::new("BTCUSDT", Action::UpdateTakeProfit)
        };
        assert!(executor.execute(&decision, Utc::now()).await.success);
        assert_eq!(exchange.take_profit("BTCUSDT", Side::Short), Some(dec!(90)));

        let above = Decision {
            new_take_profit: 101.0,
            ..Decision::new("BTCUSDT", Action::UpdateTakeProfit)
        };
        assert!(!executor.execute(&above, Utc::now()).await.success);
    }

    // ==================== Passive Action Tests ====================

    #[tokio::test]
    async fn test_hold_is_noop_and_unknown_fails() {
        let (exchange, _tracker, executor) = setup();
        let hold = executor.execute(&Decision::new("BTCUSDT", Action::Hold), Utc::now()).await;
        assert!(hold.success);
        assert_eq!(exchange.wallet(), dec!(1000));

        let unknown = executor.execute(&Decision::new("BTCUSDT", "moon"), Utc::now()).await;
        assert!(!unknown.success);
        assert_eq!(unknown.error.as_deref(), Some("unsupported action: moon"));
    }
}
