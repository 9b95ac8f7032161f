//! Paper exchange with a decimal ledger.
//!
//! Serves both collaborator seams for dry runs: account and order operations through
//! [`ExecutionAdapter`], prices through [`MarketDataProvider`]. No network calls are made.
//! Prices are pushed in with [`PaperExchange::set_price`], which also fires any resting stop
//! or take-profit orders crossed by the new price.

use crate::journal::InMemoryJournal;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use perp_guard_core::error::rejected;
use perp_guard_core::{
    Balance, ExchangePosition, ExecutionAdapter, ExecutionError, MarketDataProvider, MarketSnapshot, OrderAck,
    PositionKey, Side, TradeOutcome,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct PaperPosition {
    entry: Decimal,
    /// Always positive; the side lives in the key.
    quantity: Decimal,
    leverage: u32,
}

impl PaperPosition {
    fn margin(&self) -> Decimal {
        self.entry * self.quantity / Decimal::from(self.leverage)
    }

    fn unrealized(&self, side: Side, mark: Decimal) -> Decimal {
        match side {
            Side::Long => (mark - self.entry) * self.quantity,
            Side::Short => (self.entry - mark) * self.quantity,
        }
    }

    fn liquidation(&self, side: Side) -> Decimal {
        let step = Decimal::ONE / Decimal::from(self.leverage);
        match side {
            Side::Long => self.entry * (Decimal::ONE - step),
            Side::Short => self.entry * (Decimal::ONE + step),
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    wallet: Decimal,
    prices: HashMap<String, Decimal>,
    atr: HashMap<String, f64>,
    positions: HashMap<PositionKey, PaperPosition>,
    stops: HashMap<PositionKey, Decimal>,
    takes: HashMap<PositionKey, Decimal>,
    margin_modes: HashMap<String, bool>,
    rejected: HashSet<String>,
}

impl Ledger {
    fn mark(&self, symbol: &str) -> Result<Decimal, ExecutionError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExecutionError::MarketData {
                symbol: symbol.to_string(),
                reason: "no price".to_string(),
            })
    }

    fn mark_or_entry(&self, key: &PositionKey, position: &PaperPosition) -> Decimal {
        self.prices.get(&key.symbol).copied().unwrap_or(position.entry)
    }

    fn unrealized(&self) -> Decimal {
        self.positions
            .iter()
            .map(|(key, p)| p.unrealized(key.side, self.mark_or_entry(key, p)))
            .sum()
    }

    fn margin(&self) -> Decimal {
        self.positions.values().map(PaperPosition::margin).sum()
    }

    fn available(&self) -> Decimal {
        self.wallet + self.unrealized() - self.margin()
    }
}

/// In-process futures account for dry runs and tests.
pub struct PaperExchange {
    ledger: RwLock<Ledger>,
    fee_rate: Decimal,
    slippage_bps: Decimal,
    journal: Option<Arc<InMemoryJournal>>,
}

impl std::fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.read();
        f.debug_struct("PaperExchange")
            .field("wallet", &ledger.wallet)
            .field("positions", &ledger.positions.len())
            .field("fee_rate", &self.fee_rate)
            .field("slippage_bps", &self.slippage_bps)
            .finish_non_exhaustive()
    }
}

impl PaperExchange {
    /// Creates an account holding `wallet` USDT with a 0.04% taker fee and no slippage.
    #[must_use]
    pub fn new(wallet: Decimal) -> Self {
        Self {
            ledger: RwLock::new(Ledger {
                wallet,
                ..Ledger::default()
            }),
            fee_rate: Decimal::new(4, 4),
            slippage_bps: Decimal::ZERO,
            journal: None,
        }
    }

    #[must_use]
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Fills market orders `bps` basis points against the taker.
    #[must_use]
    pub fn with_slippage_bps(mut self, bps: Decimal) -> Self {
        self.slippage_bps = bps;
        self
    }

    /// Reports every closing fill to `journal` as a trade outcome.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<InMemoryJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Sets the mark price of `symbol` and triggers any stop or take-profit it crosses.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.ledger.write().prices.insert(symbol.to_string(), price);
        for (key, trigger) in self.crossed_orders(symbol, price) {
            tracing::info!(position = %key, trigger, price = %price, "Paper order triggered");
            if let Err(e) = self.close_position(&key.symbol, key.side, Decimal::ZERO) {
                tracing::warn!(position = %key, error = %e, "Paper trigger close failed");
            }
        }
    }

    pub fn set_atr(&self, symbol: &str, atr: f64) {
        self.ledger.write().atr.insert(symbol.to_string(), atr);
    }

    /// Makes every subsequent order on `symbol` fail as an exchange rejection.
    pub fn reject_symbol(&self, symbol: &str) {
        self.ledger.write().rejected.insert(symbol.to_string());
    }

    #[must_use]
    pub fn wallet(&self) -> Decimal {
        self.ledger.read().wallet
    }

    #[must_use]
    pub fn stop_loss(&self, symbol: &str, side: Side) -> Option<Decimal> {
        self.ledger.read().stops.get(&PositionKey::new(symbol, side)).copied()
    }

    #[must_use]
    pub fn take_profit(&self, symbol: &str, side: Side) -> Option<Decimal> {
        self.ledger.read().takes.get(&PositionKey::new(symbol, side)).copied()
    }

    /// Margin mode last requested for `symbol`, `Some(true)` for cross.
    #[must_use]
    pub fn margin_mode(&self, symbol: &str) -> Option<bool> {
        self.ledger.read().margin_modes.get(symbol).copied()
    }

    fn crossed_orders(&self, symbol: &str, price: Decimal) -> Vec<(PositionKey, &'static str)> {
        let ledger = self.ledger.read();
        [Side::Long, Side::Short]
            .into_iter()
            .map(|side| PositionKey::new(symbol, side))
            .filter(|key| ledger.positions.contains_key(key))
            .filter_map(|key| {
                let stop = ledger.stops.get(&key).copied();
                let take = ledger.takes.get(&key).copied();
                let (stop_hit, take_hit) = match key.side {
                    Side::Long => (stop.is_some_and(|s| price <= s), take.is_some_and(|t| price >= t)),
                    Side::Short => (stop.is_some_and(|s| price >= s), take.is_some_and(|t| price <= t)),
                };
                if stop_hit {
                    Some((key, "stop_loss"))
                } else if take_hit {
                    Some((key, "take_profit"))
                } else {
                    None
                }
            })
            .collect()
    }

    fn fill_price(&self, mark: Decimal, buying: bool) -> Decimal {
        let slippage = mark * self.slippage_bps / Decimal::from(10_000);
        if buying {
            mark + slippage
        } else {
            mark - slippage
        }
    }

    /// Imports a position reported by a live account, without fees or a margin check.
    ///
    /// The entry is taken as reported and the mark price is adopted when the symbol has none
    /// yet. A leverage of zero is read as 1x.
    ///
    /// # Errors
    ///
    /// Returns an error when the quantity is zero or a price is not representable.
    pub fn seed_position(&self, position: &ExchangePosition) -> Result<(), ExecutionError> {
        let symbol = position.symbol.as_str();
        let quantity = to_decimal(position.quantity.abs(), symbol, "quantity")?;
        if quantity.is_zero() {
            return Err(rejected(format!("cannot seed an empty {symbol} position")));
        }
        let entry = to_decimal(position.entry_price, symbol, "entry price")?;
        if entry <= Decimal::ZERO {
            return Err(ExecutionError::InvalidPrice {
                symbol: symbol.to_string(),
                reason: format!("non-positive entry price {entry}"),
            });
        }
        let mark = if position.mark_price > 0.0 {
            to_decimal(position.mark_price, symbol, "mark price")?
        } else {
            entry
        };

        let mut ledger = self.ledger.write();
        ledger.prices.entry(symbol.to_string()).or_insert(mark);
        ledger.positions.insert(
            position.key(),
            PaperPosition {
                entry,
                quantity,
                leverage: position.leverage.max(1),
            },
        );
        tracing::debug!(position = %position.key(), quantity = %quantity, entry = %entry, "Paper position seeded");
        Ok(())
    }

    /// Opens or adds to a position of `quantity` contracts at the current mark.
    ///
    /// # Errors
    ///
    /// Returns an error when the symbol has no price or is rejected, the quantity or leverage
    /// is not positive, or the margin plus fee exceeds the available balance.
    pub fn open_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        leverage: u32,
    ) -> Result<OrderAck, ExecutionError> {
        if quantity <= Decimal::ZERO {
            return Err(rejected(format!("quantity must be positive: {quantity}")));
        }
        if leverage == 0 {
            return Err(rejected("leverage must be positive"));
        }

        let mut ledger = self.ledger.write();
        if ledger.rejected.contains(symbol) {
            return Err(rejected(format!("{symbol} is not tradable")));
        }
        let price = self.fill_price(ledger.mark(symbol)?, side == Side::Long);
        let notional = price * quantity;
        let margin = notional / Decimal::from(leverage);
        let fee = notional * self.fee_rate;
        let available = ledger.available();
        if margin + fee > available {
            return Err(ExecutionError::InsufficientMargin {
                required: to_f64(margin + fee),
                margin: to_f64(margin),
                fee: to_f64(fee),
                available: to_f64(available),
            });
        }

        ledger.wallet -= fee;
        let key = PositionKey::new(symbol, side);
        ledger
            .positions
            .entry(key.clone())
            .and_modify(|p| {
                let total = p.quantity + quantity;
                p.entry = (p.entry * p.quantity + price * quantity) / total;
                p.quantity = total;
                p.leverage = leverage;
            })
            .or_insert(PaperPosition {
                entry: price,
                quantity,
                leverage,
            });

        let order_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(position = %key, quantity = %quantity, price = %price, order_id = %order_id, "Paper open filled");
        Ok(OrderAck {
            order_id: Some(order_id),
        })
    }

    /// Closes `quantity` of a position; zero or anything above the held size closes all.
    ///
    /// # Errors
    ///
    /// Returns an error when no such position is open or the symbol is rejected.
    pub fn close_position(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<OrderAck, ExecutionError> {
        let key = PositionKey::new(symbol, side);
        let outcome = {
            let mut ledger = self.ledger.write();
            if ledger.rejected.contains(symbol) {
                return Err(rejected(format!("{symbol} is not tradable")));
            }
            let position = ledger
                .positions
                .get(&key)
                .cloned()
                .ok_or_else(|| ExecutionError::PositionNotFound {
                    symbol: symbol.to_string(),
                })?;

            let mark = ledger.mark_or_entry(&key, &position);
            let price = self.fill_price(mark, side == Side::Short);
            let closed = if quantity <= Decimal::ZERO || quantity >= position.quantity {
                position.quantity
            } else {
                quantity
            };
            let portion = PaperPosition {
                quantity: closed,
                ..position.clone()
            };
            let pnl = portion.unrealized(side, price);
            let fee = price * closed * self.fee_rate;
            ledger.wallet += pnl - fee;

            if closed == position.quantity {
                ledger.positions.remove(&key);
                ledger.stops.remove(&key);
                ledger.takes.remove(&key);
            } else if let Some(open) = ledger.positions.get_mut(&key) {
                open.quantity -= closed;
            }

            let margin = portion.margin();
            let pnl_pct = if margin > Decimal::ZERO {
                to_f64(pnl / margin * Decimal::ONE_HUNDRED)
            } else {
                0.0
            };
            tracing::debug!(position = %key, quantity = %closed, price = %price, pnl = %pnl, "Paper close filled");
            TradeOutcome {
                symbol: symbol.to_string(),
                side,
                pnl_pct,
                closed_at: Utc::now(),
            }
        };

        if let Some(journal) = &self.journal {
            journal.record_trade(outcome);
        }
        Ok(OrderAck {
            order_id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    fn require_position(&self, symbol: &str, side: Side) -> Result<PositionKey, ExecutionError> {
        let key = PositionKey::new(symbol, side);
        if self.ledger.read().positions.contains_key(&key) {
            Ok(key)
        } else {
            Err(ExecutionError::PositionNotFound {
                symbol: symbol.to_string(),
            })
        }
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn to_decimal(value: f64, symbol: &str, what: &str) -> Result<Decimal, ExecutionError> {
    Decimal::from_f64(value).ok_or_else(|| ExecutionError::InvalidPrice {
        symbol: symbol.to_string(),
        reason: format!("{what} {value} is not representable"),
    })
}

#[async_trait]
impl ExecutionAdapter for PaperExchange {
    async fn balance(&self) -> Result<Balance, ExecutionError> {
        let ledger = self.ledger.read();
        Ok(Balance {
            total_wallet: to_f64(ledger.wallet),
            available: to_f64(ledger.available()),
            unrealized: to_f64(ledger.unrealized()),
        })
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>, ExecutionError> {
        let ledger = self.ledger.read();
        let mut positions: Vec<ExchangePosition> = ledger
            .positions
            .iter()
            .map(|(key, p)| {
                let mark = ledger.mark_or_entry(key, p);
                let signed = match key.side {
                    Side::Long => p.quantity,
                    Side::Short => -p.quantity,
                };
                ExchangePosition {
                    symbol: key.symbol.clone(),
                    side: key.side,
                    entry_price: to_f64(p.entry),
                    mark_price: to_f64(mark),
                    quantity: to_f64(signed),
                    leverage: p.leverage,
                    unrealized_pnl: to_f64(p.unrealized(key.side, mark)),
                    liquidation_price: to_f64(p.liquidation(key.side)),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.side.as_str().cmp(b.side.as_str())));
        Ok(positions)
    }

    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck, ExecutionError> {
        self.open_position(symbol, Side::Long, to_decimal(quantity, symbol, "quantity")?, leverage)
    }

    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> Result<OrderAck, ExecutionError> {
        self.open_position(symbol, Side::Short, to_decimal(quantity, symbol, "quantity")?, leverage)
    }

    async fn close_long(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError> {
        self.close_position(symbol, Side::Long, to_decimal(quantity, symbol, "quantity")?)
    }

    async fn close_short(&self, symbol: &str, quantity: f64) -> Result<OrderAck, ExecutionError> {
        self.close_position(symbol, Side::Short, to_decimal(quantity, symbol, "quantity")?)
    }

    async fn set_stop_loss(&self, symbol: &str, side: Side, _quantity: f64, price: f64) -> Result<(), ExecutionError> {
        let key = self.require_position(symbol, side)?;
        let price = to_decimal(price, symbol, "stop")?;
        self.ledger.write().stops.insert(key, price);
        Ok(())
    }

    async fn set_take_profit(&self, symbol: &str, side: Side, _quantity: f64, price: f64) -> Result<(), ExecutionError> {
        let key = self.require_position(symbol, side)?;
        let price = to_decimal(price, symbol, "take")?;
        self.ledger.write().takes.insert(key, price);
        Ok(())
    }

    async fn cancel_stop_loss_orders(&self, symbol: &str, side: Side) -> Result<(), ExecutionError> {
        self.ledger.write().stops.remove(&PositionKey::new(symbol, side));
        Ok(())
    }

    async fn cancel_take_profit_orders(&self, symbol: &str, side: Side) -> Result<(), ExecutionError> {
        self.ledger.write().takes.remove(&PositionKey::new(symbol, side));
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, cross: bool) -> Result<(), ExecutionError> {
        self.ledger.write().margin_modes.insert(symbol.to_string(), cross);
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for PaperExchange {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let ledger = self.ledger.read();
        let price = ledger
            .prices
            .get(symbol)
            .ok_or_else(|| anyhow!("no paper price for {symbol}"))?;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current_price: to_f64(*price),
            atr14: ledger.atr.get(symbol).copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_guard_core::DecisionJournal;
    use rust_decimal_macros::dec;

    fn exchange() -> PaperExchange {
        let exchange = PaperExchange::new(dec!(1000));
        exchange.set_price("BTCUSDT", dec!(100));
        exchange
    }

    // ==================== Ledger Tests ====================

    #[tokio::test]
    async fn test_seed_position_from_decoded_record() {
        let record = serde_json::json!({
            "symbol": "ETHUSDT",
            "positionAmt": "-2",
            "entryPrice": "3000",
            "markPrice": "2900",
            "leverage": "5"
        });
        let position = perp_guard_core::raw::decode_position(&record).unwrap();
        let exchange = PaperExchange::new(dec!(1000));
        exchange.seed_position(&position).unwrap();

        // Fee-free import: the wallet is untouched
        assert_eq!(exchange.wallet(), dec!(1000));
        let positions = exchange.positions().await.unwrap();
        assert_eq!(positions[0].side, Side::Short);
        assert!((positions[0].quantity + 2.0).abs() < 1e-9);
        let balance = exchange.balance().await.unwrap();
        assert!((balance.unrealized - 200.0).abs() < 1e-9);
        assert!((exchange.snapshot("ETHUSDT").await.unwrap().current_price - 2900.0).abs() < 1e-9);

        let empty = ExchangePosition {
            quantity: 0.0,
            ..position
        };
        assert!(exchange.seed_position(&empty).is_err());
    }

    #[tokio::test]
    async fn test_open_charges_fee_and_locks_margin() {
        let exchange = exchange();
        exchange.open_position("BTCUSDT", Side::Long, dec!(5), 10).unwrap();

        // 500 notional: 0.2 fee, 50 margin
        assert_eq!(exchange.wallet(), dec!(999.8));
        let balance = exchange.balance().await.unwrap();
        assert!((balance.available - 949.8).abs() < 1e-9);
        assert!(balance.unrealized.abs() < 1e-9);

        exchange.set_price("BTCUSDT", dec!(110));
        let balance = exchange.balance().await.unwrap();
        assert!((balance.unrealized - 50.0).abs() < 1e-9);
        assert!((balance.equity() - 1049.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_short_reported_with_negative_quantity() {
        let exchange = exchange();
        exchange.open_short("BTCUSDT", 2.0, 5).await.unwrap();
        exchange.set_price("BTCUSDT", dec!(90));

        let positions = exchange.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        let short = &positions[0];
        assert_eq!(short.side, Side::Short);
        assert!((short.quantity + 2.0).abs() < 1e-9);
        assert!((short.unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((short.liquidation_price - 120.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insufficient_margin_rejected() {
        let exchange = exchange();
        let err = exchange.open_long("BTCUSDT", 60.0, 5).await.unwrap_err();
        assert!(err.is_margin_related());
        assert_eq!(exchange.wallet(), dec!(1000));
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_rejections() {
        let exchange = exchange();
        assert!(matches!(
            exchange.open_long("XYZUSDT", 1.0, 5).await,
            Err(ExecutionError::MarketData { .. })
        ));
        assert!(exchange.snapshot("XYZUSDT").await.is_err());

        exchange.reject_symbol("BTCUSDT");
        assert!(matches!(
            exchange.open_long("BTCUSDT", 1.0, 5).await,
            Err(ExecutionError::Rejected(_))
        ));
    }

    // ==================== Close Tests ====================

    #[tokio::test]
    async fn test_partial_then_full_close_reports_outcomes() {
        let journal = Arc::new(InMemoryJournal::new(10));
        let exchange = PaperExchange::new(dec!(1000))
            .with_fee_rate(Decimal::ZERO)
            .with_journal(journal.clone());
        exchange.set_price("BTCUSDT", dec!(100));
        exchange.open_position("BTCUSDT", Side::Long, dec!(4), 10).unwrap();
        exchange.set_price("BTCUSDT", dec!(105));

        exchange.close_long("BTCUSDT", 1.0).await.unwrap();
        assert_eq!(exchange.wallet(), dec!(1005));
        let remaining = exchange.positions().await.unwrap();
        assert!((remaining[0].quantity - 3.0).abs() < 1e-9);

        exchange.close_long("BTCUSDT", 0.0).await.unwrap();
        assert!(exchange.positions().await.unwrap().is_empty());
        assert_eq!(exchange.wallet(), dec!(1020));

        // 5% move on 10x is a 50% return on margin
        let window = journal.performance(10).await.unwrap().unwrap();
        assert_eq!(window.recent_trades.len(), 2);
        assert!((window.recent_trades[0].pnl_pct - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_without_position_fails() {
        let exchange = exchange();
        assert!(matches!(
            exchange.close_short("BTCUSDT", 0.0).await,
            Err(ExecutionError::PositionNotFound { .. })
        ));
    }

    // ==================== Trigger Tests ====================

    #[tokio::test]
    async fn test_stop_loss_triggers_on_price_cross() {
        let exchange = exchange();
        exchange.open_long("BTCUSDT", 1.0, 5).await.unwrap();
        exchange.set_stop_loss("BTCUSDT", Side::Long, 1.0, 95.0).await.unwrap();
        exchange.set_take_profit("BTCUSDT", Side::Long, 1.0, 120.0).await.unwrap();
        assert_eq!(exchange.stop_loss("BTCUSDT", Side::Long), Some(dec!(95)));

        exchange.set_price("BTCUSDT", dec!(97));
        assert_eq!(exchange.positions().await.unwrap().len(), 1);

        exchange.set_price("BTCUSDT", dec!(94));
        assert!(exchange.positions().await.unwrap().is_empty());
        assert!(exchange.stop_loss("BTCUSDT", Side::Long).is_none());
        assert!(exchange.take_profit("BTCUSDT", Side::Long).is_none());
    }

    #[tokio::test]
    async fn test_orders_require_open_position() {
        let exchange = exchange();
        assert!(exchange.set_stop_loss("BTCUSDT", Side::Short, 1.0, 110.0).await.is_err());
        exchange.set_margin_mode("BTCUSDT", true).await.unwrap();
        assert_eq!(exchange.margin_mode("BTCUSDT"), Some(true));
    }
}
