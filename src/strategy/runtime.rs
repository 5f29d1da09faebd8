//! Strategy runtime: periodic/event-driven invocation, per-strategy failure
//! isolation, and signal validation before handing off to the order
//! manager (spec.md §4.6).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::clock::Nanos;
use crate::error::{Error, Result};
use crate::orderbook::engine::OrderBookEngine;
use crate::orders::manager::OrderManager;
use crate::orders::types::{OrderEvent, OrderId, OrderRequest};
use crate::strategy::types::{Signal, SnapshotSet};
use crate::types::{Instrument, Side, TimeInForce};

/// Consecutive on_tick failures before a strategy is quarantined
/// (spec.md §4.6: "After N=5 consecutive failures the strategy is
/// quarantined until operator intervention").
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Signals priced further than this from the book reference are rejected
/// as implausible (spec.md §4.6: "sane price within ±20% of top-of-book").
const MAX_PRICE_DEVIATION: f64 = 0.20;

/// The capability set a strategy implementation provides. Deliberately
/// synchronous: `on_tick` reads a pre-taken snapshot and must not block, so
/// it never needs to be a future (spec.md §5: "no operation in hot paths
/// allocates unboundedly or blocks on external I/O").
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn symbols(&self) -> &[String];

    /// (venue, symbol) pairs this strategy needs book snapshots for before
    /// each `on_tick` call.
    fn instruments(&self) -> Vec<Instrument>;

    /// `None` means event-driven: invoked on every update to a book this
    /// strategy tracks. `Some(interval)` means poll-driven at that cadence.
    fn update_interval(&self) -> Option<Duration> {
        None
    }

    fn on_tick(&mut self, snapshots: &SnapshotSet) -> Result<Vec<Signal>>;

    fn on_order_event(&mut self, _event: &OrderEvent) {}

    /// Called once per signal, right after the runtime routes it to the
    /// order manager, with the id of the resulting order. Lets a strategy
    /// correlate its own emitted signals with subsequent `on_order_event`
    /// calls (e.g. to track a multi-leg pair).
    fn on_signal_routed(&mut self, _signal: &Signal, _order_id: OrderId) {}

    fn start(&mut self) {}
    fn stop(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyStatus {
    Running,
    Quarantined,
}

struct StrategyHandle {
    strategy: Box<dyn Strategy>,
    status: StrategyStatus,
    consecutive_failures: u32,
    last_invoked: Nanos,
    update_interval: Option<Duration>,
    instruments: Vec<Instrument>,
    symbols: Vec<String>,
}

/// Owns every registered strategy and is the sole caller of `on_tick`.
/// Shared across feed dispatch (event-driven invocation) and the backtest
/// loop (poll-driven invocation via [`StrategyRuntime::poll_tick`]).
pub struct StrategyRuntime {
    engine: Arc<OrderBookEngine>,
    order_manager: Arc<OrderManager>,
    handles: DashMap<String, Mutex<StrategyHandle>>,
}

impl StrategyRuntime {
    pub fn new(engine: Arc<OrderBookEngine>, order_manager: Arc<OrderManager>) -> Self {
        Self {
            engine,
            order_manager,
            handles: DashMap::new(),
        }
    }

    pub fn register(&self, mut strategy: Box<dyn Strategy>) {
        strategy.start();
        let id = strategy.id().to_string();
        let handle = StrategyHandle {
            update_interval: strategy.update_interval(),
            instruments: strategy.instruments(),
            symbols: strategy.symbols().to_vec(),
            strategy,
            status: StrategyStatus::Running,
            consecutive_failures: 0,
            last_invoked: 0,
        };
        self.handles.insert(id, Mutex::new(handle));
    }

    pub fn status(&self, strategy_id: &str) -> Option<StrategyStatus> {
        self.handles.get(strategy_id).map(|h| h.lock().status)
    }

    /// Clears quarantine, per spec.md §4.6's "until operator intervention".
    pub fn reinstate(&self, strategy_id: &str) -> Result<()> {
        let handle = self
            .handles
            .get(strategy_id)
            .ok_or_else(|| Error::NotFound(format!("strategy {strategy_id}")))?;
        let mut h = handle.lock();
        h.status = StrategyStatus::Running;
        h.consecutive_failures = 0;
        Ok(())
    }

    /// Invoke every event-driven strategy that tracks `instrument`. Called
    /// by the feed dispatch path (or the backtest loop) after a book update
    /// has been applied.
    pub fn on_book_update(&self, instrument: &Instrument, at: Nanos) {
        for entry in self.handles.iter() {
            let mut handle = entry.value().lock();
            if handle.update_interval.is_some() {
                continue;
            }
            if handle.instruments.iter().any(|i| i == instrument) {
                self.invoke(&mut handle, at);
            }
        }
    }

    /// Invoke every poll-driven strategy whose interval has elapsed as of
    /// `now`. Called on a fixed tick by live-mode schedulers and, in
    /// backtest mode, once per virtual-clock step.
    pub fn poll_tick(&self, now: Nanos) {
        for entry in self.handles.iter() {
            let mut handle = entry.value().lock();
            let Some(interval) = handle.update_interval else { continue };
            let elapsed_ns = now.saturating_sub(handle.last_invoked);
            if elapsed_ns >= interval.as_nanos() as i64 {
                self.invoke(&mut handle, now);
            }
        }
    }

    fn invoke(&self, handle: &mut StrategyHandle, at: Nanos) {
        handle.last_invoked = at;
        if handle.status == StrategyStatus::Quarantined {
            return;
        }

        let mut snapshots = SnapshotSet::new();
        for instrument in &handle.instruments {
            if let Some(snapshot) = self.engine.get_snapshot(&instrument.venue, &instrument.symbol, 50) {
                snapshots.insert(snapshot);
            }
        }

        let strategy = &mut handle.strategy;
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.on_tick(&snapshots)));

        let signals = match outcome {
            Ok(Ok(signals)) => {
                handle.consecutive_failures = 0;
                signals
            }
            Ok(Err(e)) => {
                warn!(strategy = handle.strategy.id(), error = %e, "strategy on_tick failed");
                self.record_failure(handle);
                return;
            }
            Err(_) => {
                error!(strategy = handle.strategy.id(), "strategy on_tick panicked");
                self.record_failure(handle);
                return;
            }
        };

        for signal in signals {
            if let Err(e) = self.validate_signal(&signal, &handle.symbols, &snapshots) {
                warn!(strategy = handle.strategy.id(), error = %e, "rejecting invalid signal");
                continue;
            }
            self.route_signal(handle, signal, at);
        }
    }

    fn record_failure(&self, handle: &mut StrategyHandle) {
        handle.consecutive_failures += 1;
        if handle.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            handle.status = StrategyStatus::Quarantined;
            error!(strategy = handle.strategy.id(), "strategy quarantined after repeated failures");
        }
    }

    fn validate_signal(&self, signal: &Signal, known_symbols: &[String], snapshots: &SnapshotSet) -> Result<()> {
        if !known_symbols.iter().any(|s| s == &signal.symbol) {
            return Err(Error::InvalidInput(format!("signal for unknown symbol {}", signal.symbol)));
        }
        if signal.quantity <= Decimal::ZERO {
            return Err(Error::InvalidInput("signal quantity must be positive".into()));
        }
        let reference = snapshots
            .get(&signal.venue, &signal.symbol)
            .and_then(|s| match signal.side {
                Side::Buy => s.best_ask().or_else(|| s.best_bid()),
                Side::Sell => s.best_bid().or_else(|| s.best_ask()),
            })
            .map(|level| level.price);
        if let Some(reference) = reference {
            if !reference.is_zero() {
                let deviation = ((signal.price - reference) / reference).abs();
                let deviation: f64 = deviation.try_into().unwrap_or(f64::MAX);
                if deviation > MAX_PRICE_DEVIATION {
                    return Err(Error::InvalidInput(format!(
                        "signal price {} deviates {:.1}% from top-of-book {reference}",
                        signal.price,
                        deviation * 100.0
                    )));
                }
            }
        }
        Ok(())
    }

    fn route_signal(&self, handle: &mut StrategyHandle, signal: Signal, at: Nanos) {
        let request = OrderRequest {
            instrument_symbol: signal.symbol.clone(),
            side: signal.side,
            qty: signal.quantity,
            limit_price: Some(signal.price),
            tif: TimeInForce::Ioc,
        };
        match self.order_manager.submit(request, at) {
            Ok((order_id, events)) => {
                handle.strategy.on_signal_routed(&signal, order_id);
                for event in &events {
                    handle.strategy.on_order_event(event);
                }
            }
            Err(e) => {
                warn!(strategy = handle.strategy.id(), error = %e, "failed to route signal");
            }
        }
    }

    /// Broadcast an order event (typically a resting-order fill observed
    /// outside any strategy's own `on_tick` invocation, e.g. via
    /// [`OrderManager::match_resting`](crate::orders::OrderManager::match_resting))
    /// to every registered strategy. Each strategy is responsible for
    /// ignoring events it doesn't recognize.
    pub fn dispatch_order_event(&self, event: &OrderEvent) {
        for entry in self.handles.iter() {
            entry.value().lock().strategy.on_order_event(event);
        }
    }

    pub fn stop_all(&self) {
        for entry in self.handles.iter() {
            entry.value().lock().strategy.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::{DepthUpdate, PriceLevel};
    use crate::risk::{RiskLimits, RiskManager};
    use parking_lot::Mutex as PMutex;
    use rust_decimal_macros::dec;

    struct AlwaysFails;
    impl Strategy for AlwaysFails {
        fn id(&self) -> &str {
            "always-fails"
        }
        fn name(&self) -> &str {
            "always-fails"
        }
        fn symbols(&self) -> &[String] {
            &[]
        }
        fn instruments(&self) -> Vec<Instrument> {
            vec![Instrument::new("b", "X")]
        }
        fn on_tick(&mut self, _snapshots: &SnapshotSet) -> Result<Vec<Signal>> {
            Err(Error::InvalidInput("boom".into()))
        }
    }

    fn setup() -> (Arc<OrderBookEngine>, StrategyRuntime) {
        let engine = Arc::new(OrderBookEngine::new());
        let risk = Arc::new(PMutex::new(RiskManager::new(RiskLimits::default(), dec!(1_000_000))));
        let order_manager = Arc::new(OrderManager::new(engine.clone(), risk, crate::orders::FeeSchedule::new()));
        let runtime = StrategyRuntime::new(engine.clone(), order_manager);
        (engine, runtime)
    }

    #[test]
    fn strategy_quarantined_after_five_failures() {
        let (engine, runtime) = setup();
        runtime.register(Box::new(AlwaysFails));
        engine.apply_update(DepthUpdate {
            venue: "b".into(),
            symbol: "X".into(),
            bids: vec![PriceLevel::new(dec!(10), dec!(1))],
            asks: vec![PriceLevel::new(dec!(11), dec!(1))],
            timestamp: 1,
            is_snapshot: true,
        });
        let instrument = Instrument::new("b", "X");
        for t in 0..5 {
            runtime.on_book_update(&instrument, t);
        }
        assert_eq!(runtime.status("always-fails"), Some(StrategyStatus::Quarantined));
        runtime.reinstate("always-fails").unwrap();
        assert_eq!(runtime.status("always-fails"), Some(StrategyStatus::Running));
    }
}
