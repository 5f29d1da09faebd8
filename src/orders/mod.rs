//! Paper order execution: smart routing, simulated fills, and order
//! lifecycle tracking.

pub mod manager;
pub mod types;

pub use manager::{FeeSchedule, OrderManager, SlippageModel};
pub use types::{Fill, Order, OrderEvent, OrderId, OrderRequest, OrderState, RejectReason, TradeRecord};
