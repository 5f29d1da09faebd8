//! Historical market data: the restartable, in-memory dataset the backtest
//! engine (and, for parity, [`crate::feed::history_replay`]) iterate over.
//!
//! Synthetic data generation is a property of the [`HistoryProvider`], not
//! of the engine that consumes it — swapping in a provider backed by a real
//! tick store requires no change anywhere else (spec.md §9).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Nanos;
use crate::error::{Error, Result};
use crate::types::Instrument;

/// One bar of historical data: OHLC plus top-of-book and volume, enough to
/// synthesize a [`crate::orderbook::types::DepthUpdate`] for replay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Nanos,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub volume: Decimal,
}

/// One (symbol, venue)'s ordered-by-timestamp series.
#[derive(Debug, Clone, Default)]
pub struct HistoricalSeries {
    pub points: Vec<DataPoint>,
}

impl HistoricalSeries {
    /// Index of the point whose timestamp is closest to `at`, using binary
    /// search since points are timestamp-sorted. `None` only for an empty
    /// series.
    pub fn closest(&self, at: Nanos) -> Option<&DataPoint> {
        if self.points.is_empty() {
            return None;
        }
        match self.points.binary_search_by_key(&at, |p| p.timestamp) {
            Ok(idx) => Some(&self.points[idx]),
            Err(0) => Some(&self.points[0]),
            Err(idx) if idx >= self.points.len() => self.points.last(),
            Err(idx) => {
                let before = &self.points[idx - 1];
                let after = &self.points[idx];
                if (at - before.timestamp).abs() <= (after.timestamp - at).abs() {
                    Some(before)
                } else {
                    Some(after)
                }
            }
        }
    }
}

/// A restartable, immutable in-memory dataset keyed by (venue, symbol).
/// Restartable means iterating it (via [`HistoricalSeries::closest`]) never
/// mutates it, so multiple backtests can share one instance.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    series: std::collections::HashMap<Instrument, HistoricalSeries>,
}

impl HistoricalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: Instrument, mut points: Vec<DataPoint>) {
        points.sort_by_key(|p| p.timestamp);
        self.series.insert(instrument, HistoricalSeries { points });
    }

    pub fn get(&self, instrument: &Instrument) -> Option<&HistoricalSeries> {
        self.series.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.series.keys()
    }
}

/// Supplies historical data for a requested set of instruments and time
/// range. A real implementation backed by a tick store implements this
/// trait with no other engine code changing.
pub trait HistoryProvider: Send + Sync {
    fn load(&self, instruments: &[Instrument], start: Nanos, end: Nanos, frequency: Nanos) -> Result<HistoricalData>;
}

/// An already-materialized dataset, useful for tests and for callers who
/// load ticks themselves.
pub struct InMemoryHistoryProvider {
    data: HistoricalData,
}

impl InMemoryHistoryProvider {
    pub fn new(data: HistoricalData) -> Self {
        Self { data }
    }
}

impl HistoryProvider for InMemoryHistoryProvider {
    fn load(&self, _instruments: &[Instrument], _start: Nanos, _end: Nanos, _frequency: Nanos) -> Result<HistoricalData> {
        Ok(self.data.clone())
    }
}

/// Generates a geometric random walk per instrument: the default provider
/// when no real tick store is injected (spec.md §4.8 "Setup").
pub struct SyntheticHistoryProvider {
    pub volatility: f64,
    pub spread_bps: f64,
    pub tick_size: Decimal,
    pub seed: u64,
    pub start_price: Decimal,
}

impl Default for SyntheticHistoryProvider {
    fn default() -> Self {
        Self {
            volatility: 0.02,
            spread_bps: 5.0,
            tick_size: Decimal::new(1, 2),
            seed: 42,
            start_price: Decimal::new(10000, 2),
        }
    }
}

impl HistoryProvider for SyntheticHistoryProvider {
    fn load(&self, instruments: &[Instrument], start: Nanos, end: Nanos, frequency: Nanos) -> Result<HistoricalData> {
        if frequency <= 0 {
            return Err(Error::InvalidInput("data_frequency must be positive".into()));
        }
        let mut data = HistoricalData::new();
        for (idx, instrument) in instruments.iter().enumerate() {
            // Derive a distinct but deterministic seed per instrument so
            // two runs with the same config produce bit-identical series.
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(idx as u64 * 0x9E37_79B9));
            let dt_years = (frequency as f64) / (365.25 * 24.0 * 3600.0 * 1e9);
            let mut price = self.start_price;
            let mut points = Vec::new();
            let mut t = start;
            while t <= end {
                let z: f64 = rng.sample(rand_distr_standard_normal(&mut rng));
                let drift = -0.5 * self.volatility * self.volatility * dt_years;
                let diffusion = self.volatility * dt_years.sqrt() * z;
                let factor = (drift + diffusion).exp();
                let price_f64 = price.to_f64().unwrap_or(1.0) * factor;
                price = Decimal::from_f64_retain(price_f64).unwrap_or(price).round_dp(8);
                let half_spread = price * Decimal::new(self.spread_bps as i64, 4) / Decimal::from(2);
                points.push(DataPoint {
                    timestamp: t,
                    open: price,
                    high: price + half_spread,
                    low: (price - half_spread).max(self.tick_size),
                    close: price,
                    best_bid: (price - half_spread).max(self.tick_size),
                    best_ask: price + half_spread,
                    bid_size: Decimal::new(10, 0),
                    ask_size: Decimal::new(10, 0),
                    volume: Decimal::new(1, 0),
                });
                t += frequency;
            }
            data.insert(instrument.clone(), points);
        }
        Ok(data)
    }
}

/// `rand_distr` isn't in the dependency tree; a Box-Muller transform gives
/// us a standard normal sample from two uniforms without adding one.
fn rand_distr_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> StandardNormal {
    let _ = rng;
    StandardNormal
}

struct StandardNormal;

impl rand::distributions::Distribution<f64> for StandardNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u1: f64 = rng.gen_range(1e-12..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_provider_is_deterministic_given_same_seed() {
        let provider = SyntheticHistoryProvider::default();
        let instruments = vec![Instrument::new("binance", "BTCUSD")];
        let a = provider.load(&instruments, 0, 10 * crate::clock::NANOS_PER_SEC, crate::clock::NANOS_PER_SEC).unwrap();
        let b = provider.load(&instruments, 0, 10 * crate::clock::NANOS_PER_SEC, crate::clock::NANOS_PER_SEC).unwrap();
        let sa = a.get(&instruments[0]).unwrap();
        let sb = b.get(&instruments[0]).unwrap();
        assert_eq!(sa.points.len(), sb.points.len());
        for (pa, pb) in sa.points.iter().zip(sb.points.iter()) {
            assert_eq!(pa.close, pb.close);
        }
    }

    #[test]
    fn closest_point_picks_nearest_timestamp() {
        let mut data = HistoricalData::new();
        let instrument = Instrument::new("b", "X");
        data.insert(
            instrument.clone(),
            vec![
                DataPoint {
                    timestamp: 0,
                    open: Decimal::ONE,
                    high: Decimal::ONE,
                    low: Decimal::ONE,
                    close: Decimal::ONE,
                    best_bid: Decimal::ONE,
                    best_ask: Decimal::ONE,
                    bid_size: Decimal::ONE,
                    ask_size: Decimal::ONE,
                    volume: Decimal::ONE,
                },
                DataPoint {
                    timestamp: 100,
                    open: Decimal::TWO,
                    high: Decimal::TWO,
                    low: Decimal::TWO,
                    close: Decimal::TWO,
                    best_bid: Decimal::TWO,
                    best_ask: Decimal::TWO,
                    bid_size: Decimal::ONE,
                    ask_size: Decimal::ONE,
                    volume: Decimal::ONE,
                },
            ],
        );
        let series = data.get(&instrument).unwrap();
        assert_eq!(series.closest(10).unwrap().timestamp, 0);
        assert_eq!(series.closest(90).unwrap().timestamp, 100);
    }
}
