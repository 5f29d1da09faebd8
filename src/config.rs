//! Configuration shapes.
//!
//! These structs mirror the language-neutral keys spec.md §6 enumerates.
//! Loading them from YAML is out of scope for this crate (an external
//! collaborator's job); what lives here is the plain-Rust shape plus a
//! small `from_env` for the handful of knobs this crate's own binaries and
//! tests need, modeled on `models.rs::Config::from_env` in the codebase
//! this crate is grounded on.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Venue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ui_port: u16,
    pub shutdown_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub enable_cors: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            ui_port: 8081,
            shutdown_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            enable_cors: true,
            allowed_origins: vec!["*".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Websocket,
    Fix,
    Stock,
    Simulator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub kind: FeedKind,
    pub url: String,
    pub subscriptions: Vec<String>,
    pub symbols: Vec<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageConfig {
    pub symbols: Vec<String>,
    pub venues: Vec<Venue>,
    pub update_interval: Duration,
    pub min_spread_bps: Decimal,
    pub max_slippage_bps: Decimal,
    pub min_profit_bps: Decimal,
    pub max_execution_latency_ms: u64,
    pub simultaneous_venues: usize,
    pub exchange_fees: HashMap<Venue, Decimal>,
    pub risk_limit: Decimal,
    /// Minimum quantity available on both legs to act on (spec.md §4.7's
    /// "floor_quantity", left unspecified in the source prose).
    pub floor_quantity: Decimal,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            venues: Vec::new(),
            update_interval: Duration::from_secs(1),
            min_spread_bps: Decimal::new(10, 0),
            max_slippage_bps: Decimal::new(5, 0),
            min_profit_bps: Decimal::new(20, 0),
            max_execution_latency_ms: 500,
            simultaneous_venues: 2,
            exchange_fees: HashMap::new(),
            risk_limit: Decimal::new(10_000, 0),
            floor_quantity: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModelKind {
    Fixed,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTradingConfig {
    pub enabled: bool,
    pub initial_balance: HashMap<String, Decimal>,
    pub latency_simulation: bool,
    pub base_latency_ms: u64,
    pub random_latency_ms: u64,
    pub slippage_model: SlippageModelKind,
    pub fixed_slippage_bps: Decimal,
    pub exchange_fees: HashMap<Venue, Decimal>,
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        let mut initial_balance = HashMap::new();
        initial_balance.insert("USD".to_string(), Decimal::new(100_000, 0));
        Self {
            enabled: true,
            initial_balance,
            latency_simulation: true,
            base_latency_ms: 20,
            random_latency_ms: 10,
            slippage_model: SlippageModelKind::Fixed,
            fixed_slippage_bps: Decimal::ZERO,
            exchange_fees: HashMap::new(),
        }
    }
}

/// Top-level configuration bundle. A caller's YAML/env loader populates
/// this and hands it to [`crate::Engine::new`] or
/// [`crate::backtest::BacktestEngine::new`]; this crate does not load it
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub feeds: Vec<FeedConfig>,
    pub arbitrage: ArbitrageConfig,
    pub paper_trading: PaperTradingConfig,
    pub risk: crate::risk::RiskLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            feeds: Vec::new(),
            arbitrage: ArbitrageConfig::default(),
            paper_trading: PaperTradingConfig::default(),
            risk: crate::risk::RiskLimits::default(),
        }
    }
}

impl Config {
    /// Reads the small subset of knobs this crate's own binaries/tests care
    /// about from the environment, falling back to defaults for the rest.
    /// Mirrors `models.rs::Config::from_env`'s `dotenv` + `unwrap_or_else`
    /// style; a full YAML loader is out of scope here.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Config::default();
        if let Ok(port) = std::env::var("ARBIT_PORT") {
            config.server.port = port.parse().unwrap_or(config.server.port);
        }
        if let Ok(cash) = std::env::var("ARBIT_INITIAL_CAPITAL") {
            if let Ok(cash) = cash.parse::<Decimal>() {
                config.paper_trading.initial_balance.insert("USD".to_string(), cash);
            }
        }
        Ok(config)
    }
}

/// Process exit codes (spec.md §6). This crate never calls
/// `std::process::exit` itself (it is a library); these constants are for
/// an out-of-scope `main` to return.
pub mod exit_code {
    pub const NORMAL: i32 = 0;
    pub const UNRECOVERABLE_CONFIG: i32 = 1;
    pub const BIND_FAILURE: i32 = 2;
    pub const BACKTEST_SETUP_ERROR: i32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let config = Config::default();
        assert!(config.server.port > 0);
        assert!(config.paper_trading.initial_balance.contains_key("USD"));
    }
}
