//! Shared identifiers used across the fulfillment crates.

mod types;

pub use types::{LineItemId, ListingId, OrderId, ShipmentId, UserId, Version};
