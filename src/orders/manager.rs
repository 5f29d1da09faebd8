//! Paper order manager: smart venue routing, simulated level-walking
//! execution, and a shadow ladder for resting GTC/DAY remainders.
//!
//! No real exchange connectivity — this is the paper-trading execution path
//! spec.md §4.5 describes, grounded on the level-walking fill simulation in
//! `backtest_v2::matching` and the OMS bookkeeping shape in
//! `backtest_v2::oms::OmsOrder::apply_fill`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::clock::Nanos;
use crate::error::{Error, Result};
use crate::orderbook::engine::OrderBookEngine;
use crate::orderbook::types::BookSnapshot;
use crate::orders::types::{Order, OrderEvent, OrderId, OrderRequest, RejectReason, TradeRecord};
use crate::risk::{RiskDecision, RiskManager};
use crate::types::{Instrument, Side, TimeInForce, Venue};

const BOOK_DEPTH: usize = 50;
/// Bounded so a long-running live engine doesn't grow this unboundedly;
/// callers that need the full history should drain it periodically via
/// [`OrderManager::drain_trades`] (the backtest engine does this once per
/// run, live callers on whatever cadence their audit trail wants).
const TRADE_HISTORY_CAP: usize = 100_000;

/// Execution slippage model applied on top of the price actually walked off
/// the book, per spec.md §4.5: "slippage as configured (fixed bps or linear
/// in quantity)". This does not move the simulated fill price itself (that
/// still comes from walking real resting levels, so spec.md §8 property 3's
/// weighted-mean-of-consumed-levels invariant holds exactly) — it is an
/// additional estimated cost attributed to the trade for accounting and
/// backtest reporting, the way a real venue's realized slippage would be
/// reconciled against the quoted price after the fact.
#[derive(Debug, Clone, Copy)]
pub enum SlippageModel {
    Fixed { bps: Decimal },
    Linear { bps_per_unit: Decimal },
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::Fixed { bps: Decimal::ZERO }
    }
}

impl SlippageModel {
    fn estimate(&self, qty: Decimal, notional: Decimal) -> Decimal {
        let bps = match self {
            SlippageModel::Fixed { bps } => *bps,
            SlippageModel::Linear { bps_per_unit } => *bps_per_unit * qty,
        };
        notional * bps / Decimal::new(10_000, 0)
    }
}

/// Taker fee per venue, in fractional terms (0.001 = 10 bps). Venues absent
/// from the map are assumed fee-free.
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    bps: HashMap<Venue, Decimal>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, venue: impl Into<Venue>, fee: Decimal) {
        self.bps.insert(venue.into(), fee);
    }

    pub fn get(&self, venue: &str) -> Decimal {
        self.bps.get(venue).copied().unwrap_or(Decimal::ZERO)
    }
}

fn effective_price(side: Side, price: Decimal, fee: Decimal) -> Decimal {
    match side {
        Side::Buy => price * (Decimal::ONE + fee),
        Side::Sell => price * (Decimal::ONE - fee),
    }
}

/// Owns every outstanding paper order and the shadow ladder of resting
/// GTC/DAY remainders. Shared across strategies behind an `Arc`.
pub struct OrderManager {
    engine: Arc<OrderBookEngine>,
    risk: Arc<Mutex<RiskManager>>,
    fees: FeeSchedule,
    slippage: SlippageModel,
    orders: DashMap<OrderId, Order>,
    resting: DashMap<Instrument, Vec<OrderId>>,
    trades: Mutex<Vec<TradeRecord>>,
}

impl OrderManager {
    pub fn new(engine: Arc<OrderBookEngine>, risk: Arc<Mutex<RiskManager>>, fees: FeeSchedule) -> Self {
        Self::with_slippage(engine, risk, fees, SlippageModel::default())
    }

    pub fn with_slippage(engine: Arc<OrderBookEngine>, risk: Arc<Mutex<RiskManager>>, fees: FeeSchedule, slippage: SlippageModel) -> Self {
        Self {
            engine,
            risk,
            fees,
            slippage,
            orders: DashMap::new(),
            resting: DashMap::new(),
            trades: Mutex::new(Vec::new()),
        }
    }

    /// Record one fill's cost, notify the risk manager, and push a
    /// [`TradeRecord`] onto the trade history.
    fn settle_fill(&self, order_id: OrderId, instrument: &Instrument, side: Side, qty: Decimal, price: Decimal, at: Nanos) {
        let notional = qty * price;
        let commission = notional * self.fees.get(&instrument.venue);
        let slippage_cost = self.slippage.estimate(qty, notional);
        let realized_pnl_delta = self.risk.lock().on_fill(instrument, side, qty, price, commission, at);

        let mut trades = self.trades.lock();
        if trades.len() >= TRADE_HISTORY_CAP {
            trades.remove(0);
        }
        trades.push(TradeRecord {
            order_id,
            instrument: instrument.clone(),
            side,
            qty,
            price,
            commission,
            slippage_cost,
            realized_pnl_delta,
            at,
        });
    }

    /// Drain and return every trade executed since the last call. Callers
    /// (the backtest engine, a live audit trail) own aggregating these.
    pub fn drain_trades(&self) -> Vec<TradeRecord> {
        std::mem::take(&mut *self.trades.lock())
    }

    /// Pick the venue quoting `symbol` with the best fee-adjusted price for
    /// `side`. Ties broken by narrower spread, then alphabetical venue name
    /// (spec.md §4.5).
    fn select_venue(&self, symbol: &str, side: Side) -> Option<Venue> {
        let mut best: Option<(Venue, Decimal, Decimal)> = None; // (venue, effective_price, spread)
        for instrument in self.engine.list_books() {
            if instrument.symbol != symbol {
                continue;
            }
            let top = self.engine.top_of_book(&instrument.venue, &instrument.symbol);
            let (quote, spread) = match side {
                Side::Buy => {
                    let ask = top.best_ask?;
                    let spread = top.best_bid.map(|b| ask.price - b.price).unwrap_or(Decimal::MAX);
                    (ask.price, spread)
                }
                Side::Sell => {
                    let bid = top.best_bid?;
                    let spread = top.best_ask.map(|a| a.price - bid.price).unwrap_or(Decimal::MAX);
                    (bid.price, spread)
                }
            };
            let effective = effective_price(side, quote, self.fees.get(&instrument.venue));
            let better = match &best {
                None => true,
                Some((cur_venue, cur_price, cur_spread)) => {
                    let improves = match side {
                        Side::Buy => effective < *cur_price,
                        Side::Sell => effective > *cur_price,
                    };
                    improves
                        || (effective == *cur_price && spread < *cur_spread)
                        || (effective == *cur_price && spread == *cur_spread && instrument.venue < *cur_venue)
                }
            };
            if better {
                best = Some((instrument.venue, effective, spread));
            }
        }
        best.map(|(venue, _, _)| venue)
    }

    /// Walk `snapshot`'s opposing ladder, filling up to `qty` at or better
    /// than `limit_price` (`None` = marketable at any price).
    fn walk_book(snapshot: &BookSnapshot, side: Side, qty: Decimal, limit_price: Option<Decimal>) -> (Vec<(Decimal, Decimal)>, Decimal) {
        let levels: Vec<(Decimal, Decimal)> = match side {
            Side::Buy => snapshot.asks.iter().map(|l| (l.price, l.volume)).collect(),
            Side::Sell => snapshot.bids.iter().map(|l| (l.price, l.volume)).collect(),
        };
        let mut remaining = qty;
        let mut fills = Vec::new();
        for (price, volume) in levels {
            if let Some(limit) = limit_price {
                let crosses = match side {
                    Side::Buy => price <= limit,
                    Side::Sell => price >= limit,
                };
                if !crosses {
                    break;
                }
            }
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(volume);
            fills.push((price, take));
            remaining -= take;
        }
        (fills, remaining)
    }

    /// Submit an order. Routes to the best venue, risk-checks, then
    /// simulates execution per the requested time-in-force.
    pub fn submit(&self, request: OrderRequest, at: Nanos) -> Result<(OrderId, Vec<OrderEvent>)> {
        let Some(venue) = self.select_venue(&request.instrument_symbol, request.side) else {
            return Err(Error::Unavailable(format!("no venue quotes '{}'", request.instrument_symbol)));
        };
        let instrument = Instrument::new(venue.clone(), request.instrument_symbol.clone());

        let check_price = self
            .engine
            .top_of_book(&instrument.venue, &instrument.symbol)
            .best_ask
            .or(self.engine.top_of_book(&instrument.venue, &instrument.symbol).best_bid)
            .map(|l| l.price)
            .unwrap_or(Decimal::ZERO);

        let check_commission = request.qty * check_price * self.fees.get(&instrument.venue);
        let decision = self
            .risk
            .lock()
            .check(&instrument, request.side, request.qty, check_price, check_commission, at);
        let mut order = Order::new(instrument.clone(), request.side, request.qty, request.limit_price, request.tif, at);
        let mut events = Vec::new();

        if let RiskDecision::Deny(reason) = decision {
            order.reject(at);
            events.push(OrderEvent::Rejected { order_id: order.id, reason: RejectReason::Risk(reason) });
            self.orders.insert(order.id, order.clone());
            return Ok((order.id, events));
        }

        order.accept(at);
        events.push(OrderEvent::Accepted { order_id: order.id });

        let Some(snapshot) = self.engine.get_snapshot(&instrument.venue, &instrument.symbol, BOOK_DEPTH) else {
            order.reject(at);
            events.push(OrderEvent::Rejected { order_id: order.id, reason: RejectReason::NoLiquidity });
            self.orders.insert(order.id, order.clone());
            return Ok((order.id, events));
        };

        let (fills, remaining) = Self::walk_book(&snapshot, order.side, order.qty, order.limit_price);

        if order.tif == TimeInForce::Fok && !remaining.is_zero() {
            order.reject(at);
            events.push(OrderEvent::Rejected { order_id: order.id, reason: RejectReason::FokUnfillable });
            self.orders.insert(order.id, order.clone());
            return Ok((order.id, events));
        }

        for (price, qty) in fills {
            order.apply_fill(qty, price, at);
            self.settle_fill(order.id, &instrument, order.side, qty, price, at);
            let fill = order.fills.last().cloned().unwrap();
            let event = if order.state == crate::orders::types::OrderState::Filled {
                OrderEvent::Filled { order_id: order.id, fill }
            } else {
                OrderEvent::PartiallyFilled { order_id: order.id, fill }
            };
            events.push(event);
        }

        if !order.remaining().is_zero() && order.state != crate::orders::types::OrderState::Filled {
            match order.tif {
                TimeInForce::Ioc | TimeInForce::Fok => {
                    order.cancel(at);
                    events.push(OrderEvent::Cancelled { order_id: order.id });
                }
                TimeInForce::Gtc | TimeInForce::Day => {
                    self.resting.entry(instrument.clone()).or_default().push(order.id);
                    info!(order_id = %order.id, instrument = %instrument, remaining = %order.remaining(), "order resting");
                }
            }
        }

        self.orders.insert(order.id, order.clone());
        Ok((order.id, events))
    }

    pub fn cancel(&self, order_id: OrderId, at: Nanos) -> Result<OrderEvent> {
        let mut entry = self.orders.get_mut(&order_id).ok_or_else(|| Error::NotFound(format!("order {order_id}")))?;
        if entry.state.is_terminal() {
            return Err(Error::StateConflict(format!("order {order_id} already in terminal state {:?}", entry.state)));
        }
        entry.cancel(at);
        if let Some(mut ids) = self.resting.get_mut(&entry.instrument) {
            ids.retain(|id| *id != order_id);
        }
        Ok(OrderEvent::Cancelled { order_id })
    }

    /// Try to match resting orders for `instrument` against its current
    /// book, oldest order first. Callers invoke this after applying a depth
    /// update for the instrument (the order manager does not subscribe to
    /// book updates itself, to keep the feed pipeline free of execution
    /// logic).
    pub fn match_resting(&self, instrument: &Instrument, at: Nanos) -> Vec<OrderEvent> {
        let Some(snapshot) = self.engine.get_snapshot(&instrument.venue, &instrument.symbol, BOOK_DEPTH) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let Some(mut ids) = self.resting.get_mut(instrument) else {
            return events;
        };
        let mut still_resting = Vec::new();
        for order_id in ids.drain(..) {
            let Some(mut order) = self.orders.get_mut(&order_id) else { continue };
            let (fills, remaining) = Self::walk_book(&snapshot, order.side, order.remaining(), order.limit_price);
            for (price, qty) in fills {
                order.apply_fill(qty, price, at);
                self.settle_fill(order_id, instrument, order.side, qty, price, at);
                let fill = order.fills.last().cloned().unwrap();
                let event = if order.state == crate::orders::types::OrderState::Filled {
                    OrderEvent::Filled { order_id, fill }
                } else {
                    OrderEvent::PartiallyFilled { order_id, fill }
                };
                events.push(event);
            }
            if !remaining.is_zero() && !order.state.is_terminal() {
                still_resting.push(order_id);
            }
        }
        *ids = still_resting;
        events
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    pub fn list_open_orders(&self) -> Vec<Order> {
        self.orders.iter().filter(|o| !o.state.is_terminal()).map(|o| o.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::{DepthUpdate, PriceLevel};
    use crate::risk::RiskLimits;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<OrderBookEngine>, OrderManager) {
        let engine = Arc::new(OrderBookEngine::new());
        engine.apply_update(DepthUpdate {
            venue: "binance".into(),
            symbol: "BTCUSD".into(),
            bids: vec![PriceLevel::new(dec!(100), dec!(2))],
            asks: vec![PriceLevel::new(dec!(101), dec!(1)), PriceLevel::new(dec!(102), dec!(5))],
            timestamp: 1,
            is_snapshot: true,
        });
        engine.apply_update(DepthUpdate {
            venue: "coinbase".into(),
            symbol: "BTCUSD".into(),
            bids: vec![PriceLevel::new(dec!(99), dec!(2))],
            asks: vec![PriceLevel::new(dec!(100.5), dec!(3))],
            timestamp: 1,
            is_snapshot: true,
        });
        let risk = Arc::new(Mutex::new(RiskManager::new(RiskLimits::default(), dec!(1_000_000))));
        let manager = OrderManager::new(engine.clone(), risk, FeeSchedule::new());
        (engine, manager)
    }

    #[test]
    fn routes_buy_to_cheapest_ask() {
        let (_engine, manager) = setup();
        let venue = manager.select_venue("BTCUSD", Side::Buy).unwrap();
        assert_eq!(venue, "coinbase");
    }

    #[test]
    fn market_buy_walks_levels_across_best_venue() {
        let (_engine, manager) = setup();
        let request = OrderRequest {
            instrument_symbol: "BTCUSD".into(),
            side: Side::Buy,
            qty: dec!(3),
            limit_price: None,
            tif: TimeInForce::Ioc,
        };
        let (order_id, events) = manager.submit(request, 10).unwrap();
        let order = manager.get_order(order_id).unwrap();
        assert_eq!(order.state, crate::orders::types::OrderState::Filled);
        assert_eq!(order.filled_qty, dec!(3));
        assert!(events.iter().any(|e| matches!(e, OrderEvent::Filled { .. })));
    }

    #[test]
    fn fok_rejected_when_liquidity_insufficient() {
        let (_engine, manager) = setup();
        let request = OrderRequest {
            instrument_symbol: "BTCUSD".into(),
            side: Side::Buy,
            qty: dec!(100),
            limit_price: None,
            tif: TimeInForce::Fok,
        };
        let (order_id, _events) = manager.submit(request, 10).unwrap();
        let order = manager.get_order(order_id).unwrap();
        assert_eq!(order.state, crate::orders::types::OrderState::Rejected);
    }

    #[test]
    fn gtc_remainder_rests_and_later_matches() {
        let (engine, manager) = setup();
        let request = OrderRequest {
            instrument_symbol: "BTCUSD".into(),
            side: Side::Buy,
            qty: dec!(10),
            limit_price: Some(dec!(101)),
            tif: TimeInForce::Gtc,
        };
        let (order_id, _events) = manager.submit(request, 10).unwrap();
        let order = manager.get_order(order_id).unwrap();
        assert_eq!(order.state, crate::orders::types::OrderState::PartiallyFilled);

        engine.apply_update(DepthUpdate {
            venue: "coinbase".into(),
            symbol: "BTCUSD".into(),
            bids: vec![],
            asks: vec![PriceLevel::new(dec!(101), dec!(20))],
            timestamp: 20,
            is_snapshot: false,
        });
        let instrument = Instrument::new("coinbase", "BTCUSD");
        let events = manager.match_resting(&instrument, 21);
        assert!(!events.is_empty());
        let order = manager.get_order(order_id).unwrap();
        assert_eq!(order.state, crate::orders::types::OrderState::Filled);
    }

    /// S3: book asks=[(101,1),(102,2)]; BUY qty=2 IOC -> 2 partials
    /// (1@101, 1@102), total cost 203, commission = 203 x fee.
    #[test]
    fn s3_paper_fill_ioc_records_commission() {
        let engine = Arc::new(OrderBookEngine::new());
        engine.apply_update(DepthUpdate {
            venue: "binance".into(),
            symbol: "BTCUSD".into(),
            bids: vec![],
            asks: vec![PriceLevel::new(dec!(101), dec!(1)), PriceLevel::new(dec!(102), dec!(2))],
            timestamp: 1,
            is_snapshot: true,
        });
        let risk = Arc::new(Mutex::new(RiskManager::new(RiskLimits::default(), dec!(1_000_000))));
        let mut fees = FeeSchedule::new();
        fees.set("binance", dec!(0.001));
        let manager = OrderManager::new(engine, risk, fees);

        let request = OrderRequest {
            instrument_symbol: "BTCUSD".into(),
            side: Side::Buy,
            qty: dec!(2),
            limit_price: Some(dec!(102)),
            tif: TimeInForce::Ioc,
        };
        let (order_id, _events) = manager.submit(request, 10).unwrap();
        let order = manager.get_order(order_id).unwrap();
        assert_eq!(order.state, crate::orders::types::OrderState::Filled);
        assert_eq!(order.filled_qty, dec!(2));

        let trades = manager.drain_trades();
        assert_eq!(trades.len(), 2);
        let total_cost: Decimal = trades.iter().map(|t| t.qty * t.price).sum();
        assert_eq!(total_cost, dec!(203));
        let total_commission: Decimal = trades.iter().map(|t| t.commission).sum();
        assert_eq!(total_commission, dec!(203) * dec!(0.001));
    }
}
