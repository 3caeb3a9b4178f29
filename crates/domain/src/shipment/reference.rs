//! Reference strings sent to the carrier so its callbacks can be matched
//! back to local records.

use common::{LineItemId, ShipmentId};

const LINE_ITEM_PREFIX: &str = "ORDER_ITEM__";
const SHIPMENT_PREFIX: &str = "SHIPMENT__";

/// A parsed carrier reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierReference {
    /// Shipment requests reference the line item they ship.
    LineItem(LineItemId),
    /// Pickups reference the local shipment.
    Shipment(ShipmentId),
}

impl CarrierReference {
    /// Parses a reference; anything without a known prefix is not ours.
    pub fn parse(reference: &str) -> Option<CarrierReference> {
        if let Some(id) = reference.strip_prefix(LINE_ITEM_PREFIX) {
            return id.parse().ok().map(CarrierReference::LineItem);
        }
        if let Some(id) = reference.strip_prefix(SHIPMENT_PREFIX) {
            return id.parse().ok().map(CarrierReference::Shipment);
        }
        None
    }

    /// The line item id, when this references one.
    pub fn line_item_id(reference: &str) -> Option<LineItemId> {
        match Self::parse(reference)? {
            CarrierReference::LineItem(id) => Some(id),
            CarrierReference::Shipment(_) => None,
        }
    }
}

impl std::fmt::Display for CarrierReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CarrierReference::LineItem(id) => write!(f, "{LINE_ITEM_PREFIX}{id}"),
            CarrierReference::Shipment(id) => write!(f, "{SHIPMENT_PREFIX}{id}"),
        }
    }
}
