//! Adapter-shaped wrapper over [`crate::history`], so a historical series can
//! be fed through the same `FeedManager` pipeline a live venue uses. The
//! backtest engine itself does not go through this path (it drives the
//! order book directly off the virtual clock, spec.md §4.8) — this exists so
//! replay-through-the-normal-pipeline stays possible for integration tests
//! that want parity between live and replayed code paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::feed::adapter::{Channel, RawEvent, VenueAdapter};
use crate::history::HistoricalSeries;
use crate::types::Instrument;

pub struct HistoryReplayAdapter {
    venue: String,
    series: HistoricalSeries,
    instrument: Instrument,
    clock: Arc<RwLock<Clock>>,
    cursor: usize,
    poll_interval: Duration,
}

impl HistoryReplayAdapter {
    pub fn new(instrument: Instrument, series: HistoricalSeries, clock: Arc<RwLock<Clock>>) -> Self {
        Self {
            venue: instrument.venue.clone(),
            series,
            instrument,
            clock,
            cursor: 0,
            poll_interval: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl VenueAdapter for HistoryReplayAdapter {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, _symbols: &[String], _channels: &[Channel]) -> Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        loop {
            let Some(point) = self.series.points.get(self.cursor) else {
                return Ok(None);
            };
            if self.clock.read().now() < point.timestamp {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            let is_snapshot = self.cursor == 0;
            self.cursor += 1;
            let payload = json!({
                "symbol": self.instrument.symbol,
                "bids": [[point.best_bid.to_string(), point.bid_size.to_string()]],
                "asks": [[point.best_ask.to_string(), point.ask_size.to_string()]],
                "ts": point.timestamp,
                "snapshot": is_snapshot,
            });
            return Ok(Some(RawEvent::Depth { payload, is_snapshot }));
        }
    }

    async fn disconnect(&mut self) {}
}

impl HistoryReplayAdapter {
    /// Returns an error variant consumers can match on when a series has
    /// been exhausted but more events were still expected (diagnostics
    /// only; `next_event` itself just returns `Ok(None)`).
    pub fn exhausted_error(&self) -> Error {
        Error::NotFound(format!("history series for {} exhausted at cursor {}", self.instrument, self.cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DataPoint;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn replays_points_once_clock_catches_up() {
        let clock = Arc::new(RwLock::new(Clock::Sim(crate::clock::SimClock::new(0))));
        let series = HistoricalSeries {
            points: vec![DataPoint {
                timestamp: 0,
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                best_bid: Decimal::ONE,
                best_ask: Decimal::TWO,
                bid_size: Decimal::ONE,
                ask_size: Decimal::ONE,
                volume: Decimal::ONE,
            }],
        };
        let mut adapter = HistoryReplayAdapter::new(Instrument::new("sim", "X"), series, clock);
        let event = adapter.next_event().await.unwrap().unwrap();
        assert!(event.is_snapshot_depth());
        assert!(adapter.next_event().await.unwrap().is_none());
    }
}
