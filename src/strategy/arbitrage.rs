//! Cross-venue arbitrage detection (spec.md §4.7).

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::Result;
use crate::orders::{OrderEvent, OrderId};
use crate::strategy::runtime::Strategy;
use crate::strategy::types::{Signal, SnapshotSet};
use crate::types::{Instrument, Side, Symbol, Venue};

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    pub symbols: Vec<Symbol>,
    pub venues: Vec<Venue>,
    pub update_interval: Duration,
    pub min_spread_bps: Decimal,
    pub max_slippage_bps: Decimal,
    pub min_profit_bps: Decimal,
    pub max_execution_latency_ms: u64,
    pub exchange_fees: HashMap<Venue, Decimal>,
    pub risk_limit: Decimal,
    pub floor_quantity: Decimal,
    pub simultaneous_venues: usize,
}

impl ArbitrageConfig {
    fn fee(&self, venue: &str) -> Decimal {
        self.exchange_fees.get(venue).copied().unwrap_or(Decimal::ZERO)
    }
}

/// `crate::config::ArbitrageConfig` is the language-neutral shape an
/// external loader populates from YAML/env (spec.md §6); this is the
/// value the strategy itself consumes. Same fields, so the conversion is
/// a straight move rather than a meaningful transform.
impl From<crate::config::ArbitrageConfig> for ArbitrageConfig {
    fn from(c: crate::config::ArbitrageConfig) -> Self {
        Self {
            symbols: c.symbols,
            venues: c.venues,
            update_interval: c.update_interval,
            min_spread_bps: c.min_spread_bps,
            max_slippage_bps: c.max_slippage_bps,
            min_profit_bps: c.min_profit_bps,
            max_execution_latency_ms: c.max_execution_latency_ms,
            exchange_fees: c.exchange_fees,
            risk_limit: c.risk_limit,
            floor_quantity: c.floor_quantity,
            simultaneous_venues: c.simultaneous_venues,
        }
    }
}

/// A venue pair's computed opportunity for one symbol on one tick.
#[derive(Debug, Clone)]
struct Opportunity {
    venue_a: Venue,
    venue_b: Venue,
    symbol: Symbol,
    ask_a: Decimal,
    bid_b: Decimal,
    net_profit: Decimal,
    qty: Decimal,
    latency_estimate_ms: u64,
}

/// An in-flight pair of legs submitted on the same tick, tracked until both
/// resolve so a fill-quantity mismatch can be hedged (spec.md §9 Open
/// Question (c): this crate implements the post-trade-hedge option, not
/// atomic two-leg settlement).
#[derive(Debug, Clone)]
struct PendingPair {
    symbol: Symbol,
    buy_venue: Venue,
    sell_venue: Venue,
    buy_order: Option<OrderId>,
    sell_order: Option<OrderId>,
    buy_filled: Decimal,
    sell_filled: Decimal,
    buy_price: Decimal,
    sell_price: Decimal,
}

/// Detects and acts on cross-venue price dislocations. Reference
/// implementation per spec.md §4.7 — one execution per symbol per tick,
/// fee- and slippage-adjusted, with a tie-break toward highest net profit
/// then lowest combined latency estimate.
pub struct ArbitrageStrategy {
    id: String,
    config: ArbitrageConfig,
    symbols: Vec<String>,
    /// Keyed by order id so `on_order_event`/`on_signal_routed` can find the
    /// pair a fill belongs to.
    pending: HashMap<OrderId, PendingPair>,
    hedge_signals: Vec<Signal>,
}

impl ArbitrageStrategy {
    pub fn new(config: ArbitrageConfig) -> Self {
        let symbols = config.symbols.clone();
        Self {
            id: "arbitrage".to_string(),
            config,
            symbols,
            pending: HashMap::new(),
            hedge_signals: Vec::new(),
        }
    }

    fn scan_symbol(&self, symbol: &str, snapshots: &SnapshotSet) -> Option<Opportunity> {
        let mut best: Option<Opportunity> = None;
        for (i, venue_a) in self.config.venues.iter().enumerate() {
            for venue_b in self.config.venues.iter().skip(i + 1) {
                if let Some(opp) = self.evaluate_pair(symbol, venue_a, venue_b, snapshots) {
                    best = match best {
                        None => Some(opp),
                        Some(current) if is_better(&opp, &current) => Some(opp),
                        Some(current) => Some(current),
                    };
                }
                // Also check the reverse direction: buy B, sell A.
                if let Some(opp) = self.evaluate_pair(symbol, venue_b, venue_a, snapshots) {
                    best = match best {
                        None => Some(opp),
                        Some(current) if is_better(&opp, &current) => Some(opp),
                        Some(current) => Some(current),
                    };
                }
            }
        }
        best
    }

    /// Evaluate buying on `venue_a` and selling on `venue_b`.
    fn evaluate_pair(&self, symbol: &str, venue_a: &str, venue_b: &str, snapshots: &SnapshotSet) -> Option<Opportunity> {
        let book_a = snapshots.get(venue_a, symbol)?;
        let book_b = snapshots.get(venue_b, symbol)?;
        let ask_a = book_a.best_ask()?;
        let bid_b = book_b.best_bid()?;
        let mid = (ask_a.price + bid_b.price) / Decimal::TWO;
        if mid.is_zero() {
            return None;
        }

        let raw_spread = bid_b.price - ask_a.price;
        let fee_cost = ask_a.price * self.config.fee(venue_a) + bid_b.price * self.config.fee(venue_b);
        let slippage_cost = self.config.max_slippage_bps * mid / Decimal::new(10_000, 0);
        let net = raw_spread - fee_cost - slippage_cost;

        let net_bps = net / mid * Decimal::new(10_000, 0);
        if net_bps < self.config.min_profit_bps {
            return None;
        }

        let available_a = ask_a.volume;
        let available_b = bid_b.volume;
        if available_a < self.config.floor_quantity || available_b < self.config.floor_quantity {
            return None;
        }

        let risk_qty = if self.config.risk_limit.is_zero() {
            Decimal::ZERO
        } else {
            self.config.risk_limit / mid
        };
        let qty = available_a.min(available_b).min(risk_qty);
        if qty <= Decimal::ZERO {
            return None;
        }

        Some(Opportunity {
            venue_a: venue_a.to_string(),
            venue_b: venue_b.to_string(),
            symbol: symbol.to_string(),
            ask_a: ask_a.price,
            bid_b: bid_b.price,
            net_profit: net * qty,
            qty,
            latency_estimate_ms: self.config.max_execution_latency_ms,
        })
    }

    /// Fold any outstanding hedge signals (from mismatched fills detected in
    /// `on_order_event`) into this tick's emission.
    fn drain_hedges(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.hedge_signals)
    }
}

fn is_better(candidate: &Opportunity, current: &Opportunity) -> bool {
    if candidate.net_profit.abs() != current.net_profit.abs() {
        return candidate.net_profit.abs() > current.net_profit.abs();
    }
    candidate.latency_estimate_ms < current.latency_estimate_ms
}

impl Strategy for ArbitrageStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "arbitrage"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn instruments(&self) -> Vec<Instrument> {
        self.config
            .venues
            .iter()
            .flat_map(|v| self.config.symbols.iter().map(move |s| Instrument::new(v.clone(), s.clone())))
            .collect()
    }

    fn update_interval(&self) -> Option<Duration> {
        Some(self.config.update_interval)
    }

    fn on_tick(&mut self, snapshots: &SnapshotSet) -> Result<Vec<Signal>> {
        let mut signals = self.drain_hedges();

        for symbol in self.config.symbols.clone() {
            let Some(opp) = self.scan_symbol(&symbol, snapshots) else {
                continue;
            };
            let buy = Signal::new(opp.venue_a.clone(), opp.symbol.clone(), Side::Buy, opp.qty, opp.ask_a)
                .with_metadata("pair_leg", "buy")
                .with_metadata("counter_venue", opp.venue_b.clone());
            let sell = Signal::new(opp.venue_b.clone(), opp.symbol.clone(), Side::Sell, opp.qty, opp.bid_b)
                .with_metadata("pair_leg", "sell")
                .with_metadata("counter_venue", opp.venue_a.clone());
            signals.push(buy);
            signals.push(sell);
        }

        Ok(signals)
    }

    fn on_signal_routed(&mut self, signal: &Signal, order_id: OrderId) {
        let leg = signal.metadata.get("pair_leg").map(String::as_str);
        let counter_venue = signal.metadata.get("counter_venue").cloned().unwrap_or_default();
        match leg {
            Some("buy") => {
                self.pending.insert(
                    order_id,
                    PendingPair {
                        symbol: signal.symbol.clone(),
                        buy_venue: signal.venue.clone(),
                        sell_venue: counter_venue,
                        buy_order: Some(order_id),
                        sell_order: None,
                        buy_filled: Decimal::ZERO,
                        sell_filled: Decimal::ZERO,
                        buy_price: signal.price,
                        sell_price: Decimal::ZERO,
                    },
                );
            }
            Some("sell") => {
                if let Some(pair) = self
                    .pending
                    .values_mut()
                    .find(|p| p.symbol == signal.symbol && p.sell_order.is_none() && p.sell_venue == signal.venue)
                {
                    pair.sell_order = Some(order_id);
                    pair.sell_price = signal.price;
                }
            }
            _ => {}
        }
    }

    fn on_order_event(&mut self, event: &OrderEvent) {
        let (order_id, fill_qty) = match event {
            OrderEvent::PartiallyFilled { order_id, fill, .. } | OrderEvent::Filled { order_id, fill, .. } => {
                (*order_id, fill.qty)
            }
            _ => return,
        };

        let mut resolved_key = None;
        for (key, pair) in self.pending.iter_mut() {
            if pair.buy_order == Some(order_id) {
                pair.buy_filled += fill_qty;
                resolved_key = Some(*key);
                break;
            }
            if pair.sell_order == Some(order_id) {
                pair.sell_filled += fill_qty;
                resolved_key = Some(*key);
                break;
            }
        }

        let Some(key) = resolved_key else { return };
        let both_terminal = matches!(event, OrderEvent::Filled { .. });
        if !both_terminal {
            return;
        }
        let Some(pair) = self.pending.get(&key) else { return };
        if pair.buy_order.is_none() || pair.sell_order.is_none() {
            return;
        }

        let mismatch = pair.buy_filled - pair.sell_filled;
        if !mismatch.is_zero() {
            // One leg over-filled relative to the other: flatten the
            // excess on the side that has too much inventory.
            let (venue, side, qty, price) = if mismatch > Decimal::ZERO {
                (pair.sell_venue.clone(), Side::Sell, mismatch, pair.sell_price)
            } else {
                (pair.buy_venue.clone(), Side::Buy, -mismatch, pair.buy_price)
            };
            self.hedge_signals.push(
                Signal::new(venue, pair.symbol.clone(), side, qty, price).with_metadata("pair_leg", "hedge"),
            );
        }

        if pair.buy_filled > Decimal::ZERO || pair.sell_filled > Decimal::ZERO {
            self.pending.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::BookSnapshot;
    use rust_decimal_macros::dec;

    fn config() -> ArbitrageConfig {
        let mut fees = HashMap::new();
        fees.insert("venueA".to_string(), dec!(0.001));
        fees.insert("venueB".to_string(), dec!(0.001));
        ArbitrageConfig {
            symbols: vec!["BTC-USD".to_string()],
            venues: vec!["venueA".to_string(), "venueB".to_string()],
            update_interval: Duration::from_millis(100),
            min_spread_bps: dec!(10),
            max_slippage_bps: Decimal::ZERO,
            min_profit_bps: dec!(20),
            max_execution_latency_ms: 50,
            exchange_fees: fees,
            risk_limit: dec!(1_000_000),
            floor_quantity: dec!(0.01),
            simultaneous_venues: 2,
        }
    }

    fn snapshot(venue: &str, bid: Decimal, ask: Decimal) -> BookSnapshot {
        BookSnapshot {
            venue: venue.to_string(),
            symbol: "BTC-USD".to_string(),
            bids: vec![crate::orderbook::types::PriceLevel::new(bid, dec!(10))],
            asks: vec![crate::orderbook::types::PriceLevel::new(ask, dec!(10))],
            last_update: 0,
            sequence: 1,
        }
    }

    /// Replicates spec.md's S5 scenario exactly: ask_A=100.0 fee 0.001,
    /// bid_B=100.5 fee 0.001, min_profit_bps=20 -> net ≈ 29.9 bps, signal
    /// emitted; raising both fees to 0.003 kills it.
    #[test]
    fn s5_arbitrage_trigger_and_fee_kill() {
        let mut strategy = ArbitrageStrategy::new(config());
        let mut snapshots = SnapshotSet::new();
        snapshots.insert(snapshot("venueA", dec!(99.9), dec!(100.0)));
        snapshots.insert(snapshot("venueB", dec!(100.5), dec!(100.6)));

        let signals = strategy.on_tick(&snapshots).unwrap();
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().any(|s| s.venue == "venueA" && s.side == Side::Buy));
        assert!(signals.iter().any(|s| s.venue == "venueB" && s.side == Side::Sell));

        let mut high_fee_config = config();
        high_fee_config.exchange_fees.insert("venueA".to_string(), dec!(0.003));
        high_fee_config.exchange_fees.insert("venueB".to_string(), dec!(0.003));
        let mut strategy = ArbitrageStrategy::new(high_fee_config);
        let signals = strategy.on_tick(&snapshots).unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn no_signal_when_spread_below_threshold() {
        let mut strategy = ArbitrageStrategy::new(config());
        let mut snapshots = SnapshotSet::new();
        snapshots.insert(snapshot("venueA", dec!(99.99), dec!(100.0)));
        snapshots.insert(snapshot("venueB", dec!(100.01), dec!(100.02)));
        let signals = strategy.on_tick(&snapshots).unwrap();
        assert!(signals.is_empty());
    }
}
