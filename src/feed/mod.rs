//! Market-data ingestion: venue adapters, reconnect/backpressure management,
//! and the concrete adapter kinds named in spec.md §4.3.

pub mod adapter;
pub mod fix;
pub mod history_replay;
pub mod manager;
pub mod simulator;
pub mod websocket;

pub use adapter::{Channel, RawEvent, VenueAdapter};
pub use fix::FixAdapter;
pub use history_replay::HistoryReplayAdapter;
pub use manager::{AdapterHealth, AdapterState, FeedManager};
pub use simulator::SimulatorAdapter;
pub use websocket::{SubscriptionBuilder, WebSocketAdapter};
