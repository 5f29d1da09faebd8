//! Order lifecycle types.
//!
//! The state machine is deliberately smaller than the teacher's
//! `backtest_v2::oms::OrderState` (which tracks venue ack round-trips this
//! crate's paper/simulated fills never need): `New -> Accepted ->
//! PartiallyFilled -> {Filled, Cancelled, Rejected}`. Transitions are
//! checked so a bug upstream fails loudly instead of corrupting state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Nanos;
use crate::risk::DenyReason;
use crate::types::{Instrument, Side, TimeInForce};

pub type OrderId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled | OrderState::Rejected)
    }

    /// Whether moving from `self` to `next` is a legal FSM edge.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (New, Accepted)
                | (New, Rejected)
                | (Accepted, PartiallyFilled)
                | (Accepted, Filled)
                | (Accepted, Cancelled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument_symbol: String,
    pub side: Side,
    pub qty: Decimal,
    /// `None` means a market order: marketable against the best price the
    /// router finds, with no limit.
    pub limit_price: Option<Decimal>,
    pub tif: TimeInForce,
}

#[derive(Debug, Clone)]
pub struct Fill {
    pub qty: Decimal,
    pub price: Decimal,
    pub at: Nanos,
}

/// One executed fill, fully costed. This is the record the backtest result
/// and any audit trail consume; [`Fill`] stays the lighter-weight value
/// attached to [`OrderEvent`]s.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub order_id: OrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub slippage_cost: Decimal,
    pub realized_pnl_delta: Decimal,
    pub at: Nanos,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub tif: TimeInForce,
    pub state: OrderState,
    pub filled_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub fills: Vec<Fill>,
    pub created_at: Nanos,
    pub updated_at: Nanos,
}

impl Order {
    pub fn new(instrument: Instrument, side: Side, qty: Decimal, limit_price: Option<Decimal>, tif: TimeInForce, at: Nanos) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument,
            side,
            qty,
            limit_price,
            tif,
            state: OrderState::New,
            filled_qty: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fills: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.qty - self.filled_qty
    }

    fn transition(&mut self, next: OrderState, at: Nanos) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal order transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.updated_at = at;
    }

    pub fn accept(&mut self, at: Nanos) {
        self.transition(OrderState::Accepted, at);
    }

    pub fn reject(&mut self, at: Nanos) {
        self.transition(OrderState::Rejected, at);
    }

    pub fn cancel(&mut self, at: Nanos) {
        self.transition(OrderState::Cancelled, at);
    }

    /// Apply a fill, updating weighted average fill price and moving to
    /// `Filled` once fully executed.
    pub fn apply_fill(&mut self, qty: Decimal, price: Decimal, at: Nanos) {
        let prior_notional = self.avg_fill_price * self.filled_qty;
        self.filled_qty += qty;
        self.avg_fill_price = if self.filled_qty.is_zero() {
            Decimal::ZERO
        } else {
            (prior_notional + qty * price) / self.filled_qty
        };
        self.fills.push(Fill { qty, price, at });

        if self.remaining().is_zero() {
            self.transition(OrderState::Filled, at);
        } else {
            self.transition(OrderState::PartiallyFilled, at);
        }
    }
}

/// Emitted by [`crate::orders::manager::OrderManager`] on every lifecycle
/// transition; strategies subscribe to react to fills.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    Accepted { order_id: OrderId },
    Rejected { order_id: OrderId, reason: RejectReason },
    PartiallyFilled { order_id: OrderId, fill: Fill },
    Filled { order_id: OrderId, fill: Fill },
    Cancelled { order_id: OrderId },
}

#[derive(Debug, Clone)]
pub enum RejectReason {
    Risk(DenyReason),
    NoLiquidity,
    FokUnfillable,
    NoRoute,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Risk(reason) => write!(f, "risk check failed: {reason}"),
            RejectReason::NoLiquidity => write!(f, "no liquidity available"),
            RejectReason::FokUnfillable => write!(f, "fill-or-kill could not be filled in full"),
            RejectReason::NoRoute => write!(f, "no venue quotes this symbol"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fill_then_fill_completes_order() {
        let mut order = Order::new(Instrument::new("b", "X"), Side::Buy, dec!(10), Some(dec!(100)), TimeInForce::Gtc, 0);
        order.accept(1);
        order.apply_fill(dec!(4), dec!(99), 2);
        assert_eq!(order.state, OrderState::PartiallyFilled);
        order.apply_fill(dec!(6), dec!(101), 3);
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_fill_price, (dec!(4) * dec!(99) + dec!(6) * dec!(101)) / dec!(10));
    }

    #[test]
    fn illegal_transition_is_rejected_by_debug_assert() {
        assert!(!OrderState::Filled.can_transition_to(OrderState::Accepted));
        assert!(!OrderState::Rejected.can_transition_to(OrderState::Filled));
    }
}
