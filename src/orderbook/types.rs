//! Wire and in-memory types for order book depth and trades.

use crate::clock::Nanos;
use crate::types::{Side, Symbol, Venue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price/volume pair on a ladder. A `volume` of zero means "delete this
/// level" when applied as part of an incremental [`DepthUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }
}

/// A depth update for one (venue, symbol). `bids` must be sorted descending
/// by price and `asks` ascending by price before the update is handed to
/// [`crate::orderbook::engine::OrderBookEngine::apply_update`] — the engine
/// does not re-sort, it trusts the normalizer's contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub venue: Venue,
    pub symbol: Symbol,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: Nanos,
    pub is_snapshot: bool,
}

/// A single executed trade tick, normalized across venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub venue: Venue,
    pub symbol: Symbol,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: Side,
    pub timestamp: Nanos,
    pub id: String,
}

/// Immutable read of up to N levels per side, taken under a per-book read
/// lock. Cheap to clone; this is what strategies and the smart router see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub venue: Venue,
    pub symbol: Symbol,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_update: Nanos,
    pub sequence: u64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }
}

/// `(best_bid, best_ask)`, either side `None` if that book side is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopOfBook {
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
}

impl TopOfBook {
    pub fn is_empty(&self) -> bool {
        self.best_bid.is_none() && self.best_ask.is_none()
    }
}

/// Wire record exposed to external consumers (spec.md §6 `DepthSnapshot`).
/// Field names and shapes are frozen for JSON compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshotWire {
    pub venue: Venue,
    pub symbol: Symbol,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub ts_ns: Nanos,
    pub seq: u64,
}

impl From<&BookSnapshot> for DepthSnapshotWire {
    fn from(s: &BookSnapshot) -> Self {
        Self {
            venue: s.venue.clone(),
            symbol: s.symbol.clone(),
            bids: s.bids.iter().map(|l| (l.price, l.volume)).collect(),
            asks: s.asks.iter().map(|l| (l.price, l.volume)).collect(),
            ts_ns: s.last_update,
            seq: s.sequence,
        }
    }
}

/// Wire record exposed to external consumers (spec.md §6 `TradeTick`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeTickWire {
    pub venue: Venue,
    pub symbol: Symbol,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: Side,
    pub ts_ns: Nanos,
    pub id: String,
}

impl From<&Trade> for TradeTickWire {
    fn from(t: &Trade) -> Self {
        Self {
            venue: t.venue.clone(),
            symbol: t.symbol.clone(),
            price: t.price,
            volume: t.volume,
            side: t.side,
            ts_ns: t.timestamp,
            id: t.id.clone(),
        }
    }
}
