//! Shipments bought from the carrier.

mod entity;
mod reference;
mod state;

pub use entity::{RefundPolicy, Shipment};
pub use reference::CarrierReference;
pub use state::ShipmentStatus;
