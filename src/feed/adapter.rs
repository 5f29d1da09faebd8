//! The single extension point for a new venue: implement [`VenueAdapter`].
//!
//! Modeled as a trait object (a value implementing a capability set) rather
//! than an inheritance hierarchy, per spec.md §9 — `WebSocketAdapter`,
//! `FixAdapter`, `SimulatorAdapter` and `HistoryReplayAdapter` are all
//! distinct structs behind the same interface.

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::Nanos;
use crate::error::Result;

/// A raw, not-yet-normalized event pulled off one adapter.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Depth { payload: Value, is_snapshot: bool },
    Trade { payload: Value },
    Heartbeat { at: Nanos },
}

impl RawEvent {
    pub fn is_snapshot_depth(&self) -> bool {
        matches!(self, RawEvent::Depth { is_snapshot: true, .. })
    }
}

/// Channels a caller may subscribe an adapter to. Adapters that don't
/// distinguish channels (e.g. the simulator) simply ignore the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Depth,
    Trades,
}

/// The capability set every venue connection must provide.
///
/// Implementors own their transport (socket, FIX session, in-memory
/// generator); `FeedManager` only ever calls through this trait, so adding a
/// venue never touches the manager's reconnect/backpressure logic.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> &str;

    /// Establish the underlying connection. Must be cheap to retry.
    async fn connect(&mut self) -> Result<()>;

    async fn subscribe(&mut self, symbols: &[String], channels: &[Channel]) -> Result<()>;

    /// Pull the next raw event, or `Ok(None)` if the stream has ended
    /// cleanly (disconnect was requested). Implementations should return
    /// `Err(Error::Transient(..))` on a recoverable I/O hiccup so
    /// `FeedManager` can apply its reconnect policy.
    async fn next_event(&mut self) -> Result<Option<RawEvent>>;

    async fn disconnect(&mut self);

    /// Seconds between expected heartbeats; adapters idle past
    /// `heartbeat_interval * 3` are declared disconnected by the manager.
    fn heartbeat_interval_secs(&self) -> u64 {
        15
    }
}
