//! Backtest run configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Nanos;
use crate::risk::RiskLimits;

/// Resolves spec.md §9 Open Question (a): the backtest loop both advances
/// virtual time and can sleep real time by `config.latency` each tick. That
/// ambiguity — execution-latency simulation vs. a rate limiter — is made
/// explicit here instead of guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// Sleep real time per tick to approximate the wall-clock cost of a
    /// live strategy invocation + order round trip.
    ExecutionSimulation,
    /// Sleep real time purely to cap how fast the run consumes CPU/IO
    /// (e.g. when replaying against a rate-limited data source).
    RateLimit,
    /// Replay as fast as possible; virtual time still advances by
    /// `data_frequency` each tick, only the real-time sleep is skipped.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start: Nanos,
    pub end: Nanos,
    pub initial_capital: Decimal,
    /// Virtual-clock step size in nanoseconds.
    pub data_frequency: Nanos,
    pub commission_bps: Decimal,
    pub slippage_bps: Decimal,
    /// Real-time sleep per tick; interpretation depends on `latency_mode`.
    pub latency: std::time::Duration,
    pub latency_mode: LatencyMode,
    pub risk_limits: RiskLimits,
    /// Seeds the synthetic data provider when no historical provider is
    /// injected, so two runs with identical config produce identical
    /// results (spec.md §8 determinism property).
    pub seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            initial_capital: Decimal::new(100_000, 0),
            data_frequency: crate::clock::NANOS_PER_SEC,
            commission_bps: Decimal::new(10, 0),
            slippage_bps: Decimal::ZERO,
            latency: std::time::Duration::ZERO,
            latency_mode: LatencyMode::ExecutionSimulation,
            risk_limits: RiskLimits::default(),
            seed: 42,
        }
    }
}
