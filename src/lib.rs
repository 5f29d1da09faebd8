//! Multi-venue market-data normalization, order book engine, arbitrage
//! detection strategy, and backtest engine — the hard core described in
//! spec.md §1. The HTTP/WS UI server, YAML config loader, log-sink
//! formatting, Prometheus exporters, and CLI wiring are out of scope: this
//! crate is the library an external binary embeds for those concerns.
//!
//! Module layout mirrors spec.md §2's component table:
//! - [`normalize`] — feed normalization (§4.1)
//! - [`orderbook`] — order book engine (§4.2)
//! - [`feed`] — feed manager + venue adapters (§4.3)
//! - [`risk`] — risk manager + portfolio (§4.4)
//! - [`orders`] — paper order manager + smart router (§4.5)
//! - [`strategy`] — strategy runtime + arbitrage reference strategy (§4.6, §4.7)
//! - [`backtest`] — historical replay driver (§4.8)
//!
//! [`Engine`] composes 1-7 for live trading the way [`backtest::BacktestEngine`]
//! composes the same components for replay (spec.md §9: "Engine struct in
//! live mode; BacktestEngine in replay — no process-wide singletons").

pub mod backtest;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod normalize;
pub mod orderbook;
pub mod orders;
pub mod risk;
pub mod strategy;
pub mod types;

use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::Result;
use crate::feed::{Channel, FeedManager, VenueAdapter};
use crate::normalize::SymbolTable;
use crate::orderbook::OrderBookEngine;
use crate::orders::{FeeSchedule, OrderManager, SlippageModel};
use crate::risk::RiskManager;
use crate::strategy::{Strategy, StrategyRuntime};

/// The live-mode composition root: owns one instance each of the book
/// engine, feed manager, risk manager, order manager, and strategy
/// runtime, wired together the way spec.md §2's data-flow table describes.
///
/// Built once per process from an injected [`Config`] (spec.md §9: "Global
/// mutable state... is captured as explicitly injected dependencies").
/// Compare [`backtest::BacktestEngine`], which wires the identical
/// downstream stack (order manager, risk manager, strategy runtime)
/// against a virtual clock instead of live adapters.
pub struct Engine {
    book_engine: Arc<OrderBookEngine>,
    feed_manager: Arc<FeedManager>,
    risk: Arc<Mutex<RiskManager>>,
    order_manager: Arc<OrderManager>,
    runtime: Arc<StrategyRuntime>,
    symbols: Arc<SymbolTable>,
    cancellation: CancellationToken,
}

impl Engine {
    /// Assembles the stack from `config`. Does not start any adapters or
    /// strategies; call [`Engine::start_adapter`] / [`Engine::register_strategy`]
    /// then [`Engine::run_strategy_polling`] to bring the engine up.
    pub fn new(config: &Config) -> Self {
        let book_engine = Arc::new(OrderBookEngine::new());

        let starting_cash = config
            .paper_trading
            .initial_balance
            .get("USD")
            .copied()
            .unwrap_or(Decimal::ZERO);
        let risk = Arc::new(Mutex::new(RiskManager::new(config.risk.clone(), starting_cash)));

        let mut fees = FeeSchedule::new();
        for (venue, rate) in &config.paper_trading.exchange_fees {
            fees.set(venue.clone(), *rate);
        }
        let slippage = match config.paper_trading.slippage_model {
            crate::config::SlippageModelKind::Fixed => SlippageModel::Fixed {
                bps: config.paper_trading.fixed_slippage_bps,
            },
            crate::config::SlippageModelKind::Linear => SlippageModel::Linear {
                bps_per_unit: config.paper_trading.fixed_slippage_bps,
            },
        };
        let order_manager = Arc::new(OrderManager::with_slippage(
            book_engine.clone(),
            risk.clone(),
            fees,
            slippage,
        ));

        let runtime = Arc::new(StrategyRuntime::new(book_engine.clone(), order_manager.clone()));
        let symbols = Arc::new(SymbolTable::new());
        let feed_manager = Arc::new(FeedManager::new(book_engine.clone(), symbols.clone()));

        Self {
            book_engine,
            feed_manager,
            risk,
            order_manager,
            runtime,
            symbols,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn book_engine(&self) -> &Arc<OrderBookEngine> {
        &self.book_engine
    }

    pub fn feed_manager(&self) -> &Arc<FeedManager> {
        &self.feed_manager
    }

    pub fn risk_manager(&self) -> &Arc<Mutex<RiskManager>> {
        &self.risk
    }

    pub fn order_manager(&self) -> &Arc<OrderManager> {
        &self.order_manager
    }

    pub fn strategy_runtime(&self) -> &Arc<StrategyRuntime> {
        &self.runtime
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Registers and starts a venue adapter (spec.md §4.3). Raw events flow
    /// adapter -> normalizer -> book engine; book updates notify the
    /// strategy runtime for event-driven strategies through
    /// [`Engine::dispatch_book_update`], which callers of the dispatch loop
    /// invoke per `(venue, symbol)` observed.
    pub fn start_adapter(&self, adapter: Box<dyn VenueAdapter>, symbols: Vec<String>, channels: Vec<Channel>) {
        self.feed_manager.start_adapter(adapter, symbols, channels);
    }

    pub fn register_strategy(&self, strategy: Box<dyn Strategy>) {
        self.runtime.register(strategy);
    }

    /// Cooperative shutdown (spec.md §5): signals cancellation, stops every
    /// adapter, and drains running strategies.
    pub fn shutdown(&self) {
        info!("engine shutdown requested");
        self.cancellation.cancel();
        self.feed_manager.stop_all();
        self.runtime.stop_all();
    }

    /// Notifies the strategy runtime of a book mutation, driving
    /// event-driven strategies (spec.md §4.6). A dispatcher thread/task
    /// drains book-change notifications and calls this once per affected
    /// instrument; wiring that notification channel is the embedding
    /// binary's concern (this crate exposes the hook, not the scheduler).
    pub fn dispatch_book_update(&self, venue: &str, symbol: &str, at: crate::clock::Nanos) {
        let instrument = crate::types::Instrument::new(venue, symbol);
        for event in self.order_manager.match_resting(&instrument, at) {
            self.runtime.dispatch_order_event(&event);
        }
        self.runtime.on_book_update(&instrument, at);
    }

    /// Drives every poll-driven strategy whose `update_interval` has
    /// elapsed as of `now`. Callers invoke this from a periodic timer tick
    /// (spec.md §4.6: "poll-driven, per-strategy `update_interval`").
    pub fn poll_strategies(&self, now: crate::clock::Nanos) {
        self.runtime.poll_tick(now);
    }

    /// Submits a prospective order through risk + smart routing (spec.md
    /// §4.5). `at` is the submission timestamp (wall clock in live mode).
    pub fn submit_order(
        &self,
        request: crate::orders::OrderRequest,
        at: crate::clock::Nanos,
    ) -> Result<(crate::orders::OrderId, Vec<crate::orders::OrderEvent>)> {
        self.order_manager.submit(request, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_assembles_from_default_config() {
        let config = Config::default();
        let engine = Engine::new(&config);
        assert!(engine.book_engine().list_books().is_empty());
        assert_eq!(engine.risk_manager().lock().get_portfolio().cash_balance, Decimal::ZERO);
    }

    #[test]
    fn shutdown_cancels_token() {
        let config = Config::default();
        let engine = Engine::new(&config);
        let token = engine.cancellation();
        assert!(!token.is_cancelled());
        engine.shutdown();
        assert!(token.is_cancelled());
    }
}
