//! Pre-trade risk checks and post-fill portfolio bookkeeping.
//!
//! Grounded on the drawdown monitor and guardrail-flag pattern in this
//! codebase's original `RiskManager` (Kelly/VaR sizing for binary-outcome
//! markets) — the shape (equity/peak/throttle tracking, a flags vector
//! explaining *why* a decision was made) carries over, but the limits
//! themselves are the hard USD caps spec.md §4.4 calls for rather than a
//! Kelly-fraction position size recommendation.

use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Nanos;
use crate::risk::portfolio::Portfolio;
use crate::types::{Instrument, Side};

const EVENT_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_usd: Decimal,
    /// Aggregate cap across every venue quoting the same symbol — distinct
    /// from `max_position_usd`, which is enforced per (venue, symbol) and so
    /// never catches the cross-venue exposure an arbitrage pair builds.
    pub max_symbol_exposure_usd: Decimal,
    pub max_gross_exposure_usd: Decimal,
    pub max_daily_loss_usd: Decimal,
    pub max_order_size_usd: Decimal,
    /// Cash floor: an order is denied if the cash remaining after it
    /// settles (notional + commission debited/credited) would fall below
    /// this (spec.md §4.4 "min cash after order").
    pub min_cash_usd: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_usd: Decimal::new(100_000, 0),
            max_symbol_exposure_usd: Decimal::new(150_000, 0),
            max_gross_exposure_usd: Decimal::new(500_000, 0),
            max_daily_loss_usd: Decimal::new(10_000, 0),
            max_order_size_usd: Decimal::new(50_000, 0),
            min_cash_usd: Decimal::new(1_000, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    OrderSizeLimitExceeded,
    PositionLimitExceeded,
    SymbolExposureLimitExceeded,
    GrossExposureLimitExceeded,
    DailyLossLimitExceeded,
    MinCashViolation,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::OrderSizeLimitExceeded => "order size exceeds max_order_size_usd",
            DenyReason::PositionLimitExceeded => "resulting position exceeds max_position_usd",
            DenyReason::SymbolExposureLimitExceeded => "cross-venue symbol exposure exceeds max_symbol_exposure_usd",
            DenyReason::GrossExposureLimitExceeded => "gross exposure exceeds max_gross_exposure_usd",
            DenyReason::DailyLossLimitExceeded => "daily loss exceeds max_daily_loss_usd",
            DenyReason::MinCashViolation => "projected cash after order falls below min_cash_usd",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allow,
    Deny(DenyReason),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskEvent {
    Breach { reason: DenyReason, at: Nanos },
    WarningThreshold { metric: String, value: Decimal, at: Nanos },
    LimitReset { at: Nanos },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub gross_exposure: Decimal,
    /// Each symbol's exposure (summed across every venue holding it) as a
    /// fraction of total gross exposure, keyed by symbol (spec.md §4.4
    /// "per-symbol concentration").
    pub symbol_concentration: HashMap<String, f64>,
    pub daily_pnl: Decimal,
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Tracks peak equity and drawdown off the portfolio's marked-to-market
/// value, same idea as the teacher's `DrawdownMonitor` but driven off
/// `Decimal` equity rather than an f64 bankroll.
#[derive(Debug, Clone)]
struct DrawdownMonitor {
    peak: Decimal,
    current_drawdown: f64,
    max_drawdown: f64,
}

impl DrawdownMonitor {
    fn new(initial_equity: Decimal) -> Self {
        Self {
            peak: initial_equity.max(Decimal::ZERO),
            current_drawdown: 0.0,
            max_drawdown: 0.0,
        }
    }

    fn record(&mut self, equity: Decimal) {
        let equity = equity.max(Decimal::ZERO);
        if equity > self.peak {
            self.peak = equity;
        }
        if self.peak > Decimal::ZERO {
            let drawdown = ((self.peak - equity) / self.peak).clamp(Decimal::ZERO, Decimal::ONE);
            self.current_drawdown = drawdown.to_f64().unwrap_or(0.0);
            if self.current_drawdown > self.max_drawdown {
                self.max_drawdown = self.current_drawdown;
            }
        }
    }
}

/// Gate every order request through [`RiskManager::check`] before routing
/// it; feed every fill back through [`RiskManager::on_fill`] so exposure and
/// drawdown stay current. Callers share one instance behind a single lock
/// (e.g. `Arc<parking_lot::Mutex<RiskManager>>`) so checks are serialized
/// against the same in-flight exposure a concurrent fill is updating.
pub struct RiskManager {
    limits: RiskLimits,
    portfolio: Portfolio,
    drawdown: DrawdownMonitor,
    events: VecDeque<RiskEvent>,
    day_start_equity: Decimal,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, starting_cash: Decimal) -> Self {
        Self {
            limits,
            portfolio: Portfolio::new(starting_cash),
            drawdown: DrawdownMonitor::new(starting_cash),
            events: VecDeque::with_capacity(EVENT_HISTORY_CAP),
            day_start_equity: starting_cash,
        }
    }

    fn record_event(&mut self, event: RiskEvent) {
        if self.events.len() >= EVENT_HISTORY_CAP {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn check(&mut self, instrument: &Instrument, side: Side, qty: Decimal, price: Decimal, commission: Decimal, at: Nanos) -> RiskDecision {
        let order_notional = qty * price;
        if order_notional > self.limits.max_order_size_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::OrderSizeLimitExceeded, at });
            return RiskDecision::Deny(DenyReason::OrderSizeLimitExceeded);
        }

        let current_qty = self.portfolio.positions.get(instrument).map(|p| p.quantity()).unwrap_or(Decimal::ZERO);
        let signed_delta = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let resulting_notional = (current_qty + signed_delta).abs() * price;
        if resulting_notional > self.limits.max_position_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::PositionLimitExceeded, at });
            return RiskDecision::Deny(DenyReason::PositionLimitExceeded);
        }

        let resulting_symbol_exposure = self.symbol_exposure_excluding(&instrument.symbol, instrument) + resulting_notional;
        if resulting_symbol_exposure > self.limits.max_symbol_exposure_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::SymbolExposureLimitExceeded, at });
            return RiskDecision::Deny(DenyReason::SymbolExposureLimitExceeded);
        }

        let gross_exposure = self.gross_exposure() + order_notional;
        if gross_exposure > self.limits.max_gross_exposure_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::GrossExposureLimitExceeded, at });
            return RiskDecision::Deny(DenyReason::GrossExposureLimitExceeded);
        }

        let daily_pnl = self.portfolio.total_value() - self.day_start_equity;
        if daily_pnl < -self.limits.max_daily_loss_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::DailyLossLimitExceeded, at });
            return RiskDecision::Deny(DenyReason::DailyLossLimitExceeded);
        }

        let projected_cash = match side {
            Side::Buy => self.portfolio.cash_balance - (order_notional + commission),
            Side::Sell => self.portfolio.cash_balance + (order_notional - commission),
        };
        if projected_cash < self.limits.min_cash_usd {
            self.record_event(RiskEvent::Breach { reason: DenyReason::MinCashViolation, at });
            return RiskDecision::Deny(DenyReason::MinCashViolation);
        }

        RiskDecision::Allow
    }

    /// Apply a fill: updates FIFO lots, realized/unrealized PnL and cash.
    /// Returns the realized PnL this specific fill contributed, so callers
    /// building a trade ledger can classify it win/loss/flat.
    pub fn on_fill(&mut self, instrument: &Instrument, side: Side, qty: Decimal, price: Decimal, commission: Decimal, at: Nanos) -> Decimal {
        let realized_delta = self.portfolio.position_mut(instrument).apply_fill(side, qty, price);
        self.portfolio.settle_cash(side, qty, price, commission);
        self.portfolio.last_updated = at;
        self.drawdown.record(self.portfolio.total_value());
        realized_delta
    }

    pub fn update_mark(&mut self, instrument: &Instrument, price: Decimal, at: Nanos) {
        self.portfolio.position_mut(instrument).mark(price);
        self.portfolio.last_updated = at;
        self.drawdown.record(self.portfolio.total_value());
    }

    /// Resets the daily-loss baseline to current equity. Called once per
    /// trading-day boundary by whatever drives the clock.
    pub fn reset_daily(&mut self, at: Nanos) {
        self.day_start_equity = self.portfolio.total_value();
        self.record_event(RiskEvent::LimitReset { at });
    }

    fn gross_exposure(&self) -> Decimal {
        self.portfolio.positions.values().map(|p| p.quantity().abs() * p.last_mark_price).sum()
    }

    /// Aggregate notional exposure to `symbol` across every venue, marked at
    /// each position's own `last_mark_price` — `instrument` is excluded so
    /// callers can add the resulting notional of a prospective order on
    /// that exact (venue, symbol) without double-counting its current
    /// position twice.
    fn symbol_exposure_excluding(&self, symbol: &str, instrument: &Instrument) -> Decimal {
        self.portfolio
            .positions
            .values()
            .filter(|p| p.instrument.symbol == symbol && &p.instrument != instrument)
            .map(|p| p.quantity().abs() * p.last_mark_price)
            .sum()
    }

    /// Per-symbol exposure aggregated across every venue holding it (spec.md
    /// §4.4 "per-symbol concentration").
    fn symbol_exposure(&self) -> HashMap<String, Decimal> {
        let mut by_symbol: HashMap<String, Decimal> = HashMap::new();
        for position in self.portfolio.positions.values() {
            let exposure = position.quantity().abs() * position.last_mark_price;
            *by_symbol.entry(position.instrument.symbol.clone()).or_insert(Decimal::ZERO) += exposure;
        }
        by_symbol
    }

    pub fn get_portfolio(&self) -> Portfolio {
        self.portfolio.clone()
    }

    pub fn get_risk_metrics(&self) -> RiskMetrics {
        let gross_exposure = self.gross_exposure();
        let symbol_concentration = self
            .symbol_exposure()
            .into_iter()
            .map(|(symbol, exposure)| {
                let concentration = if gross_exposure.is_zero() {
                    0.0
                } else {
                    (exposure / gross_exposure).to_f64().unwrap_or(0.0)
                };
                (symbol, concentration)
            })
            .collect();

        RiskMetrics {
            gross_exposure,
            symbol_concentration,
            daily_pnl: self.portfolio.total_value() - self.day_start_equity,
            current_drawdown_pct: self.drawdown.current_drawdown,
            max_drawdown_pct: self.drawdown.max_drawdown,
        }
    }

    pub fn recent_events(&self) -> impl Iterator<Item = &RiskEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument() -> Instrument {
        Instrument::new("binance", "BTCUSD")
    }

    #[test]
    fn allows_order_within_limits() {
        let mut rm = RiskManager::new(RiskLimits::default(), dec!(1_000_000));
        let decision = rm.check(&instrument(), Side::Buy, dec!(1), dec!(100), Decimal::ZERO, 0);
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[test]
    fn denies_order_exceeding_max_order_size() {
        let mut limits = RiskLimits::default();
        limits.max_order_size_usd = dec!(500);
        let mut rm = RiskManager::new(limits, dec!(1_000_000));
        let decision = rm.check(&instrument(), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 0);
        assert_eq!(decision, RiskDecision::Deny(DenyReason::OrderSizeLimitExceeded));
    }

    #[test]
    fn denies_order_exceeding_position_limit() {
        let mut limits = RiskLimits::default();
        limits.max_position_usd = dec!(1000);
        limits.max_order_size_usd = dec!(1_000_000);
        let mut rm = RiskManager::new(limits, dec!(1_000_000));
        let decision = rm.check(&instrument(), Side::Buy, dec!(50), dec!(100), Decimal::ZERO, 0);
        assert_eq!(decision, RiskDecision::Deny(DenyReason::PositionLimitExceeded));
    }

    #[test]
    fn denies_order_exceeding_symbol_exposure_across_venues() {
        let mut limits = RiskLimits::default();
        limits.max_position_usd = dec!(1_000_000);
        limits.max_order_size_usd = dec!(1_000_000);
        limits.max_symbol_exposure_usd = dec!(1500);
        let mut rm = RiskManager::new(limits, dec!(1_000_000));
        // Existing position on one venue...
        rm.on_fill(&Instrument::new("binance", "BTCUSD"), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 0);
        rm.update_mark(&Instrument::new("binance", "BTCUSD"), dec!(100), 0);
        // ...an order on a *different* venue for the same symbol should
        // still be aggregated against the shared cap.
        let decision = rm.check(&Instrument::new("coinbase", "BTCUSD"), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 1);
        assert_eq!(decision, RiskDecision::Deny(DenyReason::SymbolExposureLimitExceeded));
    }

    #[test]
    fn daily_loss_breach_denies_further_orders() {
        let mut limits = RiskLimits::default();
        limits.max_daily_loss_usd = dec!(100);
        let mut rm = RiskManager::new(limits, dec!(10_000));
        rm.on_fill(&instrument(), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 0);
        rm.update_mark(&instrument(), dec!(80), 1);
        let decision = rm.check(&instrument(), Side::Buy, dec!(1), dec!(80), Decimal::ZERO, 2);
        assert_eq!(decision, RiskDecision::Deny(DenyReason::DailyLossLimitExceeded));
    }

    #[test]
    fn denies_order_that_would_breach_min_cash_floor() {
        let mut limits = RiskLimits::default();
        limits.min_cash_usd = dec!(500);
        let mut rm = RiskManager::new(limits, dec!(1000));
        // Buying 9 @ 100 = 900 notional, leaving only 100 cash -- below the
        // 500 floor.
        let decision = rm.check(&instrument(), Side::Buy, dec!(9), dec!(100), Decimal::ZERO, 0);
        assert_eq!(decision, RiskDecision::Deny(DenyReason::MinCashViolation));
    }

    #[test]
    fn allows_order_that_keeps_cash_above_floor() {
        let mut limits = RiskLimits::default();
        limits.min_cash_usd = dec!(500);
        let mut rm = RiskManager::new(limits, dec!(1000));
        let decision = rm.check(&instrument(), Side::Buy, dec!(4), dec!(100), Decimal::ZERO, 0);
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[test]
    fn on_fill_settles_cash_and_returns_realized_delta() {
        let mut rm = RiskManager::new(RiskLimits::default(), dec!(10_000));
        let delta = rm.on_fill(&instrument(), Side::Buy, dec!(10), dec!(100), dec!(1), 0);
        assert_eq!(delta, Decimal::ZERO);
        assert_eq!(rm.get_portfolio().cash_balance, dec!(10_000) - dec!(1001));

        let delta = rm.on_fill(&instrument(), Side::Sell, dec!(10), dec!(110), dec!(1), 1);
        assert_eq!(delta, dec!(100));
        assert_eq!(rm.get_portfolio().cash_balance, dec!(10_000) - dec!(1001) + dec!(1099));
    }

    #[test]
    fn risk_metrics_report_per_symbol_concentration() {
        let mut rm = RiskManager::new(RiskLimits::default(), dec!(1_000_000));
        rm.on_fill(&Instrument::new("binance", "BTCUSD"), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 0);
        rm.update_mark(&Instrument::new("binance", "BTCUSD"), dec!(100), 0);
        rm.on_fill(&Instrument::new("binance", "ETHUSD"), Side::Buy, dec!(10), dec!(100), Decimal::ZERO, 0);
        rm.update_mark(&Instrument::new("binance", "ETHUSD"), dec!(300), 0);

        let metrics = rm.get_risk_metrics();
        // BTCUSD: 1000 notional, ETHUSD: 3000 notional, gross 4000.
        assert!((metrics.symbol_concentration["BTCUSD"] - 0.25).abs() < 1e-9);
        assert!((metrics.symbol_concentration["ETHUSD"] - 0.75).abs() < 1e-9);
    }
}
