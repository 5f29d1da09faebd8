//! Venue payload normalization.
//!
//! Stateless, never blocks. Each venue adapter hands its raw payload (already
//! decoded to `serde_json::Value` by the adapter — the wire framing itself
//! is the adapter's concern, not the normalizer's) through one of the
//! functions here to produce the uniform [`DepthUpdate`] / [`Trade`] records
//! the rest of the engine operates on.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::clock::Nanos;
use crate::error::{Error, Result};
use crate::orderbook::types::{DepthUpdate, PriceLevel, Trade};
use crate::types::{Side, Symbol, Venue};

/// Maps venue-specific spellings of an instrument to one canonical symbol,
/// e.g. `BTC-USD`, `BTCUSDT`, `XBT/USD` all resolve to `BTCUSD`. Callers
/// register aliases per venue rather than the normalizer hardcoding venue
/// branches, so onboarding a new venue never requires a code change here.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    aliases: HashMap<(Venue, String), Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, venue: impl Into<Venue>, raw: impl Into<String>, canonical: impl Into<Symbol>) {
        self.aliases.insert((venue.into(), raw.into()), canonical.into());
    }

    /// Resolve a raw venue symbol to its canonical form. Falls back to a
    /// purely mechanical normalization (uppercase, strip `-`, `_`, `/`) when
    /// no explicit alias was registered, which covers the common case
    /// (`BTC-USD` -> `BTCUSD`) without requiring every venue to be
    /// enumerated up front.
    pub fn canonical_symbol(&self, venue: &str, raw_symbol: &str) -> Result<Symbol> {
        if let Some(sym) = self.aliases.get(&(venue.to_string(), raw_symbol.to_string())) {
            return Ok(sym.clone());
        }
        let cleaned: String = raw_symbol
            .chars()
            .filter(|c| *c != '-' && *c != '_' && *c != '/')
            .collect::<String>()
            .to_uppercase();
        if cleaned.is_empty() {
            return Err(Error::InvalidInput(format!(
                "unknown symbol '{raw_symbol}' for venue '{venue}'"
            )));
        }
        Ok(cleaned)
    }
}

/// One price/volume pair read out of a raw payload, e.g. `["100.5", "2.3"]`.
fn parse_level(raw: &Value) -> Result<PriceLevel> {
    let arr = raw
        .as_array()
        .ok_or_else(|| Error::InvalidInput("level is not an array".into()))?;
    if arr.len() < 2 {
        return Err(Error::InvalidInput("level array too short".into()));
    }
    let price = parse_decimal(&arr[0])?;
    let volume = parse_decimal(&arr[1])?;
    Ok(PriceLevel::new(price, volume))
}

fn parse_decimal(v: &Value) -> Result<Decimal> {
    match v {
        Value::String(s) => s
            .parse::<Decimal>()
            .map_err(|e| Error::InvalidInput(format!("bad decimal '{s}': {e}"))),
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .ok_or_else(|| Error::InvalidInput(format!("bad numeric level {n}"))),
        other => Err(Error::InvalidInput(format!("unsupported level value {other}"))),
    }
}

/// Normalize a raw depth payload of the shape
/// `{"symbol": ..., "bids": [[px, qty], ...], "asks": [...], "ts": ..., "snapshot": bool}`
/// into a [`DepthUpdate`]. This shape is deliberately generic: venue
/// adapters that speak a different wire format translate into it before
/// calling in (or, for the common case, the adapter can construct the JSON
/// directly to funnel through this single code path).
pub fn normalize_depth(venue: &str, symbols: &SymbolTable, raw: &Value) -> Result<DepthUpdate> {
    let raw_symbol = raw
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("depth payload missing 'symbol'".into()))?;
    let symbol = symbols.canonical_symbol(venue, raw_symbol)?;

    let bids = raw
        .get("bids")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidInput("depth payload missing 'bids'".into()))?
        .iter()
        .map(parse_level)
        .collect::<Result<Vec<_>>>()?;
    let asks = raw
        .get("asks")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidInput("depth payload missing 'asks'".into()))?
        .iter()
        .map(parse_level)
        .collect::<Result<Vec<_>>>()?;

    let timestamp: Nanos = raw
        .get("ts")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidInput("depth payload missing 'ts'".into()))?;
    let is_snapshot = raw.get("snapshot").and_then(Value::as_bool).unwrap_or(false);

    Ok(DepthUpdate {
        venue: venue.to_string(),
        symbol,
        bids,
        asks,
        timestamp,
        is_snapshot,
    })
}

/// Normalize a raw trade payload of the shape
/// `{"symbol": ..., "price": ..., "volume": ..., "side": "buy"|"sell", "ts": ..., "id": ...}`.
pub fn normalize_trade(venue: &str, symbols: &SymbolTable, raw: &Value) -> Result<Trade> {
    let raw_symbol = raw
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("trade payload missing 'symbol'".into()))?;
    let symbol = symbols.canonical_symbol(venue, raw_symbol)?;

    let price = raw
        .get("price")
        .ok_or_else(|| Error::InvalidInput("trade payload missing 'price'".into()))
        .and_then(parse_decimal)?;
    let volume = raw
        .get("volume")
        .ok_or_else(|| Error::InvalidInput("trade payload missing 'volume'".into()))
        .and_then(parse_decimal)?;

    let side = match raw.get("side").and_then(Value::as_str) {
        Some("buy") => Side::Buy,
        Some("sell") => Side::Sell,
        _ => return Err(Error::InvalidInput("trade payload missing/invalid 'side'".into())),
    };

    let timestamp: Nanos = raw
        .get("ts")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidInput("trade payload missing 'ts'".into()))?;
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{venue}-{symbol}-{timestamp}"));

    Ok(Trade {
        venue: venue.to_string(),
        symbol,
        price,
        volume,
        side,
        timestamp,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn canonical_symbol_variants_collapse() {
        let table = SymbolTable::new();
        assert_eq!(table.canonical_symbol("coinbase", "BTC-USD").unwrap(), "BTCUSD");
        assert_eq!(table.canonical_symbol("binance", "BTCUSDT").unwrap(), "BTCUSDT");
        assert_eq!(table.canonical_symbol("kraken", "XBT/USD").unwrap(), "XBTUSD");
    }

    #[test]
    fn canonical_symbol_explicit_alias_wins() {
        let mut table = SymbolTable::new();
        table.register("binance", "BTCUSDT", "BTCUSD");
        assert_eq!(table.canonical_symbol("binance", "BTCUSDT").unwrap(), "BTCUSD");
    }

    #[test]
    fn normalize_depth_happy_path() {
        let table = SymbolTable::new();
        let raw = json!({
            "symbol": "BTC-USD",
            "bids": [["100.5", "2"], ["100.0", "1"]],
            "asks": [["101.0", "3"]],
            "ts": 1000,
            "snapshot": true,
        });
        let update = normalize_depth("coinbase", &table, &raw).unwrap();
        assert_eq!(update.symbol, "BTCUSD");
        assert_eq!(update.bids[0].price, dec!(100.5));
        assert!(update.is_snapshot);
    }

    #[test]
    fn normalize_depth_rejects_malformed_payload() {
        let table = SymbolTable::new();
        let raw = json!({"symbol": "BTC-USD", "bids": [], "ts": 1});
        assert!(normalize_depth("coinbase", &table, &raw).is_err());
    }

    #[test]
    fn normalize_trade_happy_path() {
        let table = SymbolTable::new();
        let raw = json!({"symbol": "BTCUSDT", "price": "100.25", "volume": "0.5", "side": "buy", "ts": 42, "id": "t1"});
        let trade = normalize_trade("binance", &table, &raw).unwrap();
        assert_eq!(trade.price, dec!(100.25));
        assert_eq!(trade.side, Side::Buy);
    }
}
