//! Line item lifecycle: one purchased listing from order to delivery.

mod commands;
mod entity;
mod state;

pub use commands::{LineItemCommand, ShipmentFacts, TransitionGuards};
pub use entity::{LineItem, ReceiptBlocker};
pub use state::LineItemStatus;
