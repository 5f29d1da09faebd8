//! Per-(venue, symbol) order book state and the engine that owns all books.
//!
//! Grounded on the limit-order-book conventions in
//! `backtest_v2::matching` (tick-indexed ladders, FIFO-flavoured merge) and
//! generalized from a single binary-outcome market to arbitrary (venue,
//! symbol) pairs with decimal prices.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::clock::Nanos;
use crate::error::{Error, Result};
use crate::orderbook::types::{BookSnapshot, DepthUpdate, PriceLevel, TopOfBook};
use crate::types::{Instrument, Symbol, Venue};

/// One (venue, symbol) order book. Bids are kept highest-price-first, asks
/// lowest-price-first, both via `BTreeMap` so insert/remove/lookup are
/// O(log L) in the number of distinct price levels.
#[derive(Debug, Default)]
struct OrderBook {
    /// Keyed by `Reverse(price)` so iteration order is descending.
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update: Nanos,
    sequence: u64,
}

impl OrderBook {
    fn apply(&mut self, update: &DepthUpdate) -> Result<()> {
        if update.timestamp < self.last_update {
            return Err(Error::StaleUpdate {
                book_ts: self.last_update,
                update_ts: update.timestamp,
            });
        }

        for level in &update.bids {
            validate_level(level)?;
        }
        for level in &update.asks {
            validate_level(level)?;
        }

        if update.is_snapshot {
            self.bids = update
                .bids
                .iter()
                .filter(|l| !l.volume.is_zero())
                .map(|l| (Reverse(l.price), l.volume))
                .collect();
            self.asks = update
                .asks
                .iter()
                .filter(|l| !l.volume.is_zero())
                .map(|l| (l.price, l.volume))
                .collect();
        } else {
            for level in &update.bids {
                merge_level(&mut self.bids, Reverse(level.price), level.volume);
            }
            for level in &update.asks {
                merge_level(&mut self.asks, level.price, level.volume);
            }
        }

        let bid_side_touched = !update.bids.is_empty();
        let ask_side_touched = !update.asks.is_empty();
        self.uncross(bid_side_touched, ask_side_touched);

        self.last_update = update.timestamp;
        self.sequence += 1;
        Ok(())
    }

    /// Enforce `best_bid.price < best_ask.price`. The side that was just
    /// touched is treated as authoritative; crossing levels are trimmed
    /// from the other (resting, now-stale) side.
    fn uncross(&mut self, bid_touched: bool, ask_touched: bool) {
        loop {
            let best_bid = self.bids.keys().next().map(|r| r.0);
            let best_ask = self.asks.keys().next().copied();
            let (Some(bb), Some(ba)) = (best_bid, best_ask) else {
                break;
            };
            if bb < ba {
                break;
            }
            // Both sides crossed. Prefer trimming the side that was NOT
            // part of this update (it's the stale one); if both were
            // touched (e.g. a snapshot), trim asks by convention.
            if ask_touched && !bid_touched {
                self.bids.remove(&Reverse(bb));
            } else {
                self.asks.remove(&ba);
            }
        }
    }

    fn top_of_book(&self) -> TopOfBook {
        TopOfBook {
            best_bid: self
                .bids
                .iter()
                .next()
                .map(|(Reverse(p), v)| PriceLevel::new(*p, *v)),
            best_ask: self.asks.iter().next().map(|(p, v)| PriceLevel::new(*p, *v)),
        }
    }

    fn snapshot(&self, venue: &Venue, symbol: &Symbol, depth: usize) -> BookSnapshot {
        BookSnapshot {
            venue: venue.clone(),
            symbol: symbol.clone(),
            bids: self
                .bids
                .iter()
                .take(depth)
                .map(|(Reverse(p), v)| PriceLevel::new(*p, *v))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(p, v)| PriceLevel::new(*p, *v))
                .collect(),
            last_update: self.last_update,
            sequence: self.sequence,
        }
    }

    fn total_levels(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

fn validate_level(level: &PriceLevel) -> Result<()> {
    if level.price <= Decimal::ZERO {
        return Err(Error::InvalidLevel(format!(
            "price must be strictly positive, got {}",
            level.price
        )));
    }
    if level.volume < Decimal::ZERO {
        return Err(Error::InvalidLevel(format!(
            "volume must be non-negative, got {}",
            level.volume
        )));
    }
    Ok(())
}

fn merge_level<K: Ord + Copy>(ladder: &mut BTreeMap<K, Decimal>, key: K, volume: Decimal) {
    if volume.is_zero() {
        ladder.remove(&key);
    } else {
        ladder.insert(key, volume);
    }
}

/// Owns every (venue, symbol) order book. Books are created lazily on first
/// update and persist until the engine is dropped. Each book has its own
/// `RwLock`, so writers to distinct books never contend.
#[derive(Default)]
pub struct OrderBookEngine {
    books: DashMap<Instrument, Arc<RwLock<OrderBook>>>,
}

impl OrderBookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an incremental or snapshot depth update. Stale updates and
    /// invalid levels are logged and swallowed rather than propagated —
    /// per spec, neither should halt the engine.
    pub fn apply_update(&self, update: DepthUpdate) {
        let key = Instrument::new(update.venue.clone(), update.symbol.clone());
        let book = self
            .books
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBook::default())))
            .clone();

        let mut guard = book.write();
        match guard.apply(&update) {
            Ok(()) => {}
            Err(Error::StaleUpdate { book_ts, update_ts }) => {
                debug!(venue = %key.venue, symbol = %key.symbol, book_ts, update_ts, "dropping stale depth update");
            }
            Err(e) => {
                warn!(venue = %key.venue, symbol = %key.symbol, error = %e, "rejecting invalid depth update");
            }
        }
    }

    pub fn get_snapshot(&self, venue: &str, symbol: &str, depth: usize) -> Option<BookSnapshot> {
        let key = Instrument::new(venue, symbol);
        self.books
            .get(&key)
            .map(|b| b.read().snapshot(&key.venue, &key.symbol, depth))
    }

    pub fn top_of_book(&self, venue: &str, symbol: &str) -> TopOfBook {
        let key = Instrument::new(venue, symbol);
        self.books
            .get(&key)
            .map(|b| b.read().top_of_book())
            .unwrap_or_default()
    }

    /// All (venue, symbol) keys currently tracked, sorted for deterministic
    /// iteration in tests and metrics.
    pub fn list_books(&self) -> Vec<Instrument> {
        let mut keys: Vec<Instrument> = self.books.iter().map(|e| e.key().clone()).collect();
        keys.sort_by(|a, b| (&a.venue, &a.symbol).cmp(&(&b.venue, &b.symbol)));
        keys
    }

    pub fn total_levels(&self, venue: &str, symbol: &str) -> usize {
        let key = Instrument::new(venue, symbol);
        self.books.get(&key).map(|b| b.read().total_levels()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn upd(
        venue: &str,
        symbol: &str,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
        ts: Nanos,
        snapshot: bool,
    ) -> DepthUpdate {
        DepthUpdate {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            bids: bids.into_iter().map(|(p, v)| PriceLevel::new(p, v)).collect(),
            asks: asks.into_iter().map(|(p, v)| PriceLevel::new(p, v)).collect(),
            timestamp: ts,
            is_snapshot: snapshot,
        }
    }

    /// S1: book merge scenario from spec.md §8.
    #[test]
    fn s1_book_merge() {
        let engine = OrderBookEngine::new();
        engine.apply_update(upd(
            "binance",
            "BTCUSD",
            vec![(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            vec![(dec!(101), dec!(1)), (dec!(102), dec!(2))],
            1,
            true,
        ));
        engine.apply_update(upd(
            "binance",
            "BTCUSD",
            vec![(dec!(100), dec!(0)), (dec!(98), dec!(3))],
            vec![],
            2,
            false,
        ));

        let snap = engine.get_snapshot("binance", "BTCUSD", 10).unwrap();
        assert_eq!(
            snap.bids,
            vec![PriceLevel::new(dec!(99), dec!(2)), PriceLevel::new(dec!(98), dec!(3))]
        );
        assert_eq!(
            snap.asks,
            vec![PriceLevel::new(dec!(101), dec!(1)), PriceLevel::new(dec!(102), dec!(2))]
        );
        let top = engine.top_of_book("binance", "BTCUSD");
        assert_eq!(top.best_bid.unwrap().price, dec!(99));
        assert_eq!(top.best_ask.unwrap().price, dec!(101));
    }

    /// S2: stale update is dropped, top-of-book unchanged.
    #[test]
    fn s2_stale_drop() {
        let engine = OrderBookEngine::new();
        engine.apply_update(upd("b", "X", vec![(dec!(10), dec!(1))], vec![(dec!(11), dec!(1))], 10, true));
        engine.apply_update(upd("b", "X", vec![(dec!(20), dec!(5))], vec![], 5, false));

        let top = engine.top_of_book("b", "X");
        assert_eq!(top.best_bid.unwrap().price, dec!(10));
    }

    #[test]
    fn idempotent_snapshot() {
        let engine = OrderBookEngine::new();
        let u = upd("b", "X", vec![(dec!(10), dec!(1))], vec![(dec!(11), dec!(1))], 1, true);
        engine.apply_update(u.clone());
        let first = engine.get_snapshot("b", "X", 10).unwrap();
        // Re-apply the identical snapshot at a later timestamp (monotonic
        // guard requires ts to not go backward).
        let mut u2 = u;
        u2.timestamp = 2;
        engine.apply_update(u2);
        let second = engine.get_snapshot("b", "X", 10).unwrap();
        assert_eq!(first.bids, second.bids);
        assert_eq!(first.asks, second.asks);
    }

    #[test]
    fn crossed_update_trims_resting_side() {
        let engine = OrderBookEngine::new();
        engine.apply_update(upd("b", "X", vec![(dec!(10), dec!(1))], vec![(dec!(11), dec!(1))], 1, true));
        // New bid crosses the resting ask; ask must be trimmed away.
        engine.apply_update(upd("b", "X", vec![(dec!(12), dec!(1))], vec![], 2, false));
        let top = engine.top_of_book("b", "X");
        assert_eq!(top.best_bid.unwrap().price, dec!(12));
        assert!(top.best_ask.is_none());
    }

    #[test]
    fn invalid_level_rejected_book_unchanged() {
        let engine = OrderBookEngine::new();
        engine.apply_update(upd("b", "X", vec![(dec!(10), dec!(1))], vec![(dec!(11), dec!(1))], 1, true));
        engine.apply_update(upd("b", "X", vec![(dec!(-5), dec!(1))], vec![], 2, false));
        let top = engine.top_of_book("b", "X");
        assert_eq!(top.best_bid.unwrap().price, dec!(10));
    }

    #[test]
    fn list_books_sorted() {
        let engine = OrderBookEngine::new();
        engine.apply_update(upd("binance", "ETHUSD", vec![], vec![], 1, true));
        engine.apply_update(upd("binance", "BTCUSD", vec![], vec![], 1, true));
        engine.apply_update(upd("coinbase", "BTCUSD", vec![], vec![], 1, true));
        let keys = engine.list_books();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].venue, "binance");
        assert_eq!(keys[0].symbol, "BTCUSD");
    }
}
