//! Small identifier and enum types shared across every module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue name, e.g. `"binance"`, `"coinbase"`. Kept as an owned `String`
/// rather than an enum: new venues are onboarded by registering an adapter,
/// not by recompiling the engine.
pub type Venue = String;

/// Canonical instrument symbol, e.g. `"BTCUSD"`.
pub type Symbol = String;

/// Order / fill side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Good til cancelled.
    Gtc,
    /// Immediate or cancel: fill what's available now, cancel the rest.
    Ioc,
    /// Fill or kill: fill completely or reject without any partial fill.
    Fok,
    /// Good for the trading day; rests until end-of-day like GTC for our
    /// purposes since this engine has no trading-calendar concept.
    Day,
}

/// Venue + symbol key used to address a single order book / position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub venue: Venue,
    pub symbol: Symbol,
}

impl Instrument {
    pub fn new(venue: impl Into<Venue>, symbol: impl Into<Symbol>) -> Self {
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.venue)
    }
}
