//! Order book engine: per-(venue, symbol) depth state with incremental
//! merge, snapshot replace, and top-of-book queries.

pub mod engine;
pub mod types;

pub use engine::OrderBookEngine;
pub use types::{BookSnapshot, DepthSnapshotWire, DepthUpdate, PriceLevel, Trade, TradeTickWire, TopOfBook};
