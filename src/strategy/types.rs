//! Signal type and the per-invocation book snapshot bundle strategies read.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::orderbook::types::BookSnapshot;
use crate::types::{Instrument, Side, Symbol, Venue};

/// A strategy's proposed trade, handed to the order manager after
/// validation (spec.md §3 `Signal`).
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: Symbol,
    pub venue: Venue,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    /// In `[0, 1]`; callers validating signals don't reject on confidence
    /// alone (spec.md doesn't specify a threshold) but it's carried through
    /// to the order's metadata for downstream sizing/audit.
    pub confidence: f64,
    pub metadata: HashMap<String, String>,
}

impl Signal {
    pub fn new(venue: impl Into<Venue>, symbol: impl Into<Symbol>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            venue: venue.into(),
            side,
            quantity,
            price,
            confidence: 1.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An immutable, point-in-time bundle of top-N book snapshots, built by the
/// runtime under each book's read lock before handing control to a
/// strategy (spec.md §5: "each strategy sees a consistent immutable
/// snapshot").
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    books: HashMap<Instrument, BookSnapshot>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: BookSnapshot) {
        let key = Instrument::new(snapshot.venue.clone(), snapshot.symbol.clone());
        self.books.insert(key, snapshot);
    }

    pub fn get(&self, venue: &str, symbol: &str) -> Option<&BookSnapshot> {
        self.books.get(&Instrument::new(venue, symbol))
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
