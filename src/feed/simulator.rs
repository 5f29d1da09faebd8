//! In-process synthetic venue: a geometric random walk generator that
//! speaks the same [`VenueAdapter`] interface as a real exchange connection.
//!
//! Useful for local development and for smoke-testing the feed/strategy
//! pipeline without a network dependency; the backtest engine uses
//! [`crate::history`] directly rather than this adapter; see
//! `src/feed/history_replay.rs` for the adapter-shaped equivalent.

use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

use crate::error::Result;
use crate::feed::adapter::{Channel, RawEvent, VenueAdapter};

pub struct SimulatorAdapter {
    venue: String,
    rng: ChaCha8Rng,
    volatility: f64,
    tick_interval: Duration,
    symbols: Vec<String>,
    prices: Vec<Decimal>,
    cursor: usize,
    sequence: u64,
}

impl SimulatorAdapter {
    pub fn new(venue: impl Into<String>, seed: u64, volatility: f64, tick_interval: Duration) -> Self {
        Self {
            venue: venue.into(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            volatility,
            tick_interval,
            symbols: Vec::new(),
            prices: Vec::new(),
            cursor: 0,
            sequence: 0,
        }
    }

    fn step(&mut self, idx: usize) -> Decimal {
        let z: f64 = {
            let u1: f64 = self.rng.gen_range(1e-12..1.0);
            let u2: f64 = self.rng.gen_range(0.0..1.0);
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        };
        let dt = self.tick_interval.as_secs_f64() / (365.25 * 24.0 * 3600.0);
        let drift = -0.5 * self.volatility * self.volatility * dt;
        let diffusion = self.volatility * dt.sqrt() * z;
        let factor = (drift + diffusion).exp();
        let current = self.prices[idx].to_f64().unwrap_or(1.0) * factor;
        let next = Decimal::from_f64_retain(current).unwrap_or(self.prices[idx]).round_dp(8);
        self.prices[idx] = next;
        next
    }
}

#[async_trait]
impl VenueAdapter for SimulatorAdapter {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String], _channels: &[Channel]) -> Result<()> {
        self.symbols = symbols.to_vec();
        self.prices = vec![Decimal::new(10000, 2); symbols.len()];
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        if self.symbols.is_empty() {
            return Ok(None);
        }
        tokio::time::sleep(self.tick_interval).await;
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.symbols.len();
        let mid = self.step(idx);
        let half_spread = mid * Decimal::new(5, 4);
        self.sequence += 1;
        let payload = json!({
            "symbol": self.symbols[idx],
            "bids": [[(mid - half_spread).to_string(), "10"]],
            "asks": [[(mid + half_spread).to_string(), "10"]],
            "ts": chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            "snapshot": self.sequence == 1,
        });
        Ok(Some(RawEvent::Depth { payload, is_snapshot: self.sequence == 1 }))
    }

    async fn disconnect(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_depth_events_for_each_subscribed_symbol() {
        let mut adapter = SimulatorAdapter::new("sim", 7, 0.02, Duration::from_millis(1));
        adapter.connect().await.unwrap();
        adapter.subscribe(&["BTCUSD".into(), "ETHUSD".into()], &[Channel::Depth]).await.unwrap();
        let first = adapter.next_event().await.unwrap().unwrap();
        assert!(first.is_snapshot_depth());
        let second = adapter.next_event().await.unwrap().unwrap();
        assert!(!second.is_snapshot_depth());
    }
}
