//! Position and portfolio accounting.
//!
//! Positions track FIFO lots rather than a single running average: closing a
//! position realizes PnL lot-by-lot against whichever shares were opened
//! first, so `realized_pnl` matches what a FIFO-costed account statement
//! would show (spec.md §3 `Position`).

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Nanos;
use crate::types::{Instrument, Side};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Lot {
    /// Signed quantity: positive for a long lot, negative for a short lot.
    quantity: Decimal,
    price: Decimal,
}

/// One instrument's holding. `quantity` is the signed sum of open lots: 0
/// means flat, positive long, negative short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    lots: VecDeque<Lot>,
    pub realized_pnl: Decimal,
    pub last_mark_price: Decimal,
}

impl Position {
    pub fn flat(instrument: Instrument) -> Self {
        Self {
            instrument,
            lots: VecDeque::new(),
            realized_pnl: Decimal::ZERO,
            last_mark_price: Decimal::ZERO,
        }
    }

    pub fn quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    pub fn avg_entry_price(&self) -> Decimal {
        let qty = self.quantity();
        if qty == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let notional: Decimal = self.lots.iter().map(|l| l.quantity * l.price).sum();
        notional / qty
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.last_mark_price - self.avg_entry_price()) * self.quantity()
    }

    pub fn mark(&mut self, price: Decimal) {
        self.last_mark_price = price;
    }

    /// Apply a fill, updating lots and realized PnL. `side` is the side of
    /// the fill itself (Buy adds positive quantity, Sell adds negative).
    /// Returns the realized PnL contributed by this one fill, so callers
    /// can attribute a win/loss to the trade that closed a lot rather than
    /// only seeing the position's running total (spec.md §8 property 4).
    pub fn apply_fill(&mut self, side: Side, qty: Decimal, price: Decimal) -> Decimal {
        let realized_before = self.realized_pnl;
        let mut remaining = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };

        while remaining != Decimal::ZERO {
            let Some(front) = self.lots.front_mut() else {
                break;
            };
            let opposite = (front.quantity > Decimal::ZERO) != (remaining > Decimal::ZERO);
            if !opposite {
                break;
            }
            let close_qty = remaining.abs().min(front.quantity.abs());
            let lot_sign = if front.quantity > Decimal::ZERO { Decimal::ONE } else { -Decimal::ONE };
            self.realized_pnl += close_qty * (price - front.price) * lot_sign;

            if front.quantity > Decimal::ZERO {
                front.quantity -= close_qty;
                remaining += close_qty;
            } else {
                front.quantity += close_qty;
                remaining -= close_qty;
            }
            if front.quantity == Decimal::ZERO {
                self.lots.pop_front();
            }
        }

        if remaining != Decimal::ZERO {
            self.lots.push_back(Lot { quantity: remaining, price });
        }

        self.realized_pnl - realized_before
    }
}

/// Aggregate view across all instruments held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash_balance: Decimal,
    pub positions: HashMap<Instrument, Position>,
    pub daily_pnl: Decimal,
    pub last_updated: Nanos,
}

impl Portfolio {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash_balance: starting_cash,
            positions: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            last_updated: 0,
        }
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl()).sum()
    }

    pub fn invested_value(&self) -> Decimal {
        self.positions.values().map(|p| p.quantity().abs() * p.last_mark_price).sum()
    }

    pub fn total_value(&self) -> Decimal {
        self.cash_balance + self.positions.values().map(|p| p.quantity() * p.last_mark_price).sum::<Decimal>()
    }

    pub fn position_mut(&mut self, instrument: &Instrument) -> &mut Position {
        self.positions
            .entry(instrument.clone())
            .or_insert_with(|| Position::flat(instrument.clone()))
    }

    /// Debit/credit cash for a fill: a buy spends `qty * price + commission`,
    /// a sell receives `qty * price - commission`.
    pub fn settle_cash(&mut self, side: Side, qty: Decimal, price: Decimal, commission: Decimal) {
        let notional = qty * price;
        self.cash_balance += match side {
            Side::Buy => -(notional + commission),
            Side::Sell => notional - commission,
        };
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
    fn fifo_lots_realize_pnl_oldest_first() {
        let mut position = Position::flat(instrument());
        position.apply_fill(Side::Buy, dec!(1), dec!(100));
        position.apply_fill(Side::Buy, dec!(1), dec!(110));
        // Sell 1: closes the first (cheaper) lot, not the second.
        position.apply_fill(Side::Sell, dec!(1), dec!(120));
        assert_eq!(position.realized_pnl, dec!(20));
        assert_eq!(position.quantity(), dec!(1));
        assert_eq!(position.avg_entry_price(), dec!(110));
    }

    #[test]
    fn flipping_direction_opens_a_new_lot_for_the_remainder() {
        let mut position = Position::flat(instrument());
        position.apply_fill(Side::Buy, dec!(1), dec!(100));
        position.apply_fill(Side::Sell, dec!(3), dec!(90));
        assert_eq!(position.realized_pnl, dec!(-10));
        assert_eq!(position.quantity(), dec!(-2));
        assert_eq!(position.avg_entry_price(), dec!(90));
    }

    #[test]
    fn unrealized_pnl_uses_last_mark() {
        let mut position = Position::flat(instrument());
        position.apply_fill(Side::Buy, dec!(2), dec!(100));
        position.mark(dec!(105));
        assert_eq!(position.unrealized_pnl(), dec!(10));
    }
}
