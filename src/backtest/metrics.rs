//! Result computation: Sharpe, drawdown, trade classification.
//!
//! Round-trip trade pairing falls out of [`crate::risk::portfolio::Position`]
//! already consuming FIFO lots per fill: each [`crate::orders::TradeRecord`]
//! carries the realized PnL that specific fill closed, so classifying a
//! trade win/loss/flat is a matter of reading that field rather than
//! re-deriving entry/exit pairs here.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::clock::Nanos;
use crate::orders::TradeRecord;

/// Annualization factor grounded on `backtest_v2::metrics::calculate_sharpe`
/// (252 trading days); this crate's tick frequency is arbitrary, so the
/// factor is an approximation callers may override by post-processing
/// `sharpe_ratio` themselves if their `data_frequency` implies otherwise.
const ANNUALIZATION_FACTOR: f64 = 252.0;
const SHARPE_ZERO_GUARD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub at: Nanos,
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
    pub avg_execution_time_ns: f64,
    pub final_equity: Decimal,
    pub equity_curve: Vec<PortfolioSnapshot>,
}

/// Computed incrementally across a run, then finalized once via
/// [`MetricsAccumulator::finish`].
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    initial_capital: Decimal,
    equity_curve: Vec<PortfolioSnapshot>,
    trades: Vec<TradeRecord>,
    execution_latencies_ns: Vec<i64>,
    peak_equity: Decimal,
    max_drawdown_pct: f64,
}

impl MetricsAccumulator {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            peak_equity: initial_capital,
            ..Default::default()
        }
    }

    pub fn record_snapshot(&mut self, snapshot: PortfolioSnapshot) {
        if snapshot.total_value > self.peak_equity {
            self.peak_equity = snapshot.total_value;
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown = ((self.peak_equity - snapshot.total_value) / self.peak_equity)
                .clamp(Decimal::ZERO, Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0);
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }
        self.equity_curve.push(snapshot);
    }

    pub fn record_trades(&mut self, trades: Vec<TradeRecord>) {
        self.trades.extend(trades);
    }

    pub fn record_execution_latency(&mut self, latency_ns: i64) {
        self.execution_latencies_ns.push(latency_ns);
    }

    fn daily_returns(&self) -> Vec<f64> {
        let mut returns = Vec::new();
        for window in self.equity_curve.windows(2) {
            let prev = window[0].total_value;
            let curr = window[1].total_value;
            if prev.is_zero() {
                continue;
            }
            if let Some(ret) = ((curr - prev) / prev).to_f64() {
                returns.push(ret);
            }
        }
        returns
    }

    /// Per spec.md §9 Open Question (b): uses mean/stddev (not mean/variance
    /// as one branch of the source did) with a zero-guard so a constant
    /// price history yields `0.0`, never `NaN` (spec.md §8 scenario S6).
    fn sharpe_ratio(&self) -> f64 {
        let returns = self.daily_returns();
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns[..].mean();
        let std_dev = returns[..].std_dev();
        if std_dev < SHARPE_ZERO_GUARD {
            return 0.0;
        }
        mean / std_dev * ANNUALIZATION_FACTOR.sqrt()
    }

    pub fn finish(self) -> BacktestResult {
        let final_equity = self.equity_curve.last().map(|s| s.total_value).unwrap_or(self.initial_capital);
        let total_return_pct = if self.initial_capital.is_zero() {
            0.0
        } else {
            ((final_equity - self.initial_capital) / self.initial_capital * Decimal::new(100, 0))
                .to_f64()
                .unwrap_or(0.0)
        };

        let closed_trades: Vec<&TradeRecord> = self.trades.iter().filter(|t| !t.realized_pnl_delta.is_zero()).collect();
        let winning_trades = closed_trades.iter().filter(|t| t.realized_pnl_delta > Decimal::ZERO).count();
        let losing_trades = closed_trades.iter().filter(|t| t.realized_pnl_delta < Decimal::ZERO).count();

        let total_commission: Decimal = self.trades.iter().map(|t| t.commission).sum();
        let total_slippage: Decimal = self.trades.iter().map(|t| t.slippage_cost).sum();

        let avg_execution_time_ns = if self.execution_latencies_ns.is_empty() {
            0.0
        } else {
            self.execution_latencies_ns.iter().sum::<i64>() as f64 / self.execution_latencies_ns.len() as f64
        };

        BacktestResult {
            total_trades: self.trades.len(),
            winning_trades,
            losing_trades,
            total_return_pct,
            sharpe_ratio: self.sharpe_ratio(),
            max_drawdown_pct: self.max_drawdown_pct,
            total_commission,
            total_slippage,
            avg_execution_time_ns,
            final_equity,
            equity_curve: self.equity_curve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// S6: a constant price history has zero-variance returns; the
    /// zero-guard must produce `0.0`, not `NaN`.
    #[test]
    fn sharpe_zero_guard_on_constant_equity() {
        let mut acc = MetricsAccumulator::new(dec!(10_000));
        for t in 0..5 {
            acc.record_snapshot(PortfolioSnapshot {
                at: t,
                total_value: dec!(10_000),
                cash_balance: dec!(10_000),
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
            });
        }
        let result = acc.finish();
        assert_eq!(result.sharpe_ratio, 0.0);
        assert!(!result.sharpe_ratio.is_nan());
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let mut acc = MetricsAccumulator::new(dec!(1000));
        acc.record_snapshot(PortfolioSnapshot {
            at: 0,
            total_value: dec!(1000),
            cash_balance: dec!(1000),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        });
        acc.record_snapshot(PortfolioSnapshot {
            at: 1,
            total_value: dec!(1200),
            cash_balance: dec!(1200),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        });
        acc.record_snapshot(PortfolioSnapshot {
            at: 2,
            total_value: dec!(900),
            cash_balance: dec!(900),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        });
        let result = acc.finish();
        assert!((result.max_drawdown_pct - 0.25).abs() < 1e-9);
    }
}
