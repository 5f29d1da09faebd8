//! End-to-end historical replay: feeds synthesized or injected market data
//! through the same book/risk/order-manager/strategy stack live mode uses.

pub mod config;
pub mod engine;
pub mod metrics;

pub use config::{BacktestConfig, LatencyMode};
pub use engine::{BacktestEngine, BacktestHandle};
pub use metrics::{BacktestResult, MetricsAccumulator, PortfolioSnapshot};
