//! Domain layer for order fulfillment.
//!
//! This crate holds the pure, I/O-free parts of the system:
//! - Line item state machine with guarded transitions
//! - Shipment, tracker and pickup entities and their status vocabularies
//! - Orders and listings as seen by fulfillment
//! - Compensation tasks recorded when a cancellation side effect fails
//!
//! Every mutation goes through a method that validates the transition and
//! reports a [`StatusChange`] for the transition history.

pub mod compensation;
pub mod entity;
pub mod error;
pub mod line_item;
pub mod order;
pub mod pickup;
pub mod shipment;
pub mod tracker;
pub mod value_objects;

pub use compensation::{CompensationStep, CompensationTask};
pub use entity::{Entity, StatusChange};
pub use error::GuardError;
pub use line_item::{
    LineItem, LineItemCommand, LineItemStatus, ReceiptBlocker, ShipmentFacts, TransitionGuards,
};
pub use order::{Listing, ListingStatus, Order};
pub use pickup::{Pickup, PickupStatus, PickupWindow};
pub use shipment::{CarrierReference, RefundPolicy, Shipment, ShipmentStatus};
pub use tracker::{ShipmentTracker, TrackerMerge, TrackerUpdate, TrackingDetail};
pub use value_objects::{
    Address, CarrierShipmentId, CustomsDeclaration, CustomsItem, Money, Parcel,
};
