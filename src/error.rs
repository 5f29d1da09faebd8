//! Crate-wide error taxonomy.
//!
//! Library-facing APIs return `Result<T, Error>`. Top-level orchestration
//! (backtest driver, adapter tasks) uses `anyhow::Result` for convenience,
//! the way the rest of this codebase's binaries do, and converts into
//! `Error` at the boundary where a caller needs to match on a kind.

use thiserror::Error;

/// Error kinds surfaced across the engine.
///
/// `StaleUpdate` and `InvalidLevel` are not hard failures: the order book
/// engine logs and drops them rather than propagating them to a caller,
/// but they are still represented here so call sites that *do* want to
/// inspect the reason (tests, diagnostics) can match on them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("transient error (retry applicable): {0}")]
    Transient(String),

    #[error("risk denied: {0}")]
    RiskDenied(String),

    #[error("strategy quarantined: {0}")]
    Quarantined(String),

    #[error("no book data available for {0}")]
    Unavailable(String),

    #[error("stale update ignored (book last_update={book_ts}, update={update_ts})")]
    StaleUpdate { book_ts: i64, update_ts: i64 },

    #[error("invalid level: {0}")]
    InvalidLevel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
