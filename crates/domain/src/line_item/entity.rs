//! The line item entity.

use chrono::{DateTime, Utc};
use common::{LineItemId, ListingId, OrderId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LineItemCommand, LineItemStatus, TransitionGuards};
use crate::entity::{Entity, StatusChange};
use crate::error::GuardError;
use crate::order::{Listing, ListingStatus, Order};
use crate::shipment::ShipmentStatus;
use crate::value_objects::CarrierShipmentId;

/// One purchased listing within an order.
///
/// The status is only changed through [`LineItem::apply`], which runs the
/// guard table and records when the status last changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    id: LineItemId,
    order_id: OrderId,
    listing_id: ListingId,
    status: LineItemStatus,
    status_changed_at: DateTime<Utc>,
    /// Reason recorded by the last label failure.
    failure_reason: Option<String>,
    cancel_reason: Option<String>,
    /// Carrier batch the item was last submitted in.
    carrier_batch_id: Option<String>,
    carrier_shipment_id: Option<CarrierShipmentId>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    version: Version,
}

impl Entity for LineItem {
    fn entity_type() -> &'static str {
        "LineItem"
    }

    fn entity_id(&self) -> Uuid {
        self.id.as_uuid()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl LineItem {
    /// Creates an active line item for a paid order.
    pub fn new(id: LineItemId, order_id: OrderId, listing_id: ListingId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            order_id,
            listing_id,
            status: LineItemStatus::Active,
            status_changed_at: now,
            failure_reason: None,
            cancel_reason: None,
            carrier_batch_id: None,
            carrier_shipment_id: None,
            created_at: now,
            version: Version::initial(),
        }
    }

    pub fn id(&self) -> LineItemId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    pub fn status(&self) -> LineItemStatus {
        self.status
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn carrier_batch_id(&self) -> Option<&str> {
        self.carrier_batch_id.as_deref()
    }

    pub fn carrier_shipment_id(&self) -> Option<&CarrierShipmentId> {
        self.carrier_shipment_id.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Runs a command through the guard table and applies it.
    ///
    /// On rejection the item is left untouched.
    pub fn apply(
        &mut self,
        command: &LineItemCommand,
        guards: &TransitionGuards,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, GuardError> {
        let next = self.status.transition(command, guards)?;
        let change = StatusChange::new(command.action(), self.status, next, now)
            .with_reason(command.reason().map(str::to_string));

        match command {
            LineItemCommand::FailedToPrintLabel { reason } => {
                self.failure_reason = Some(reason.clone());
            }
            LineItemCommand::Cancel { reason } => {
                self.cancel_reason = Some(reason.clone());
            }
            LineItemCommand::ConfirmToShip
            | LineItemCommand::LabelPrinted
            | LineItemCommand::PrintLabel => {
                self.failure_reason = None;
            }
            _ => {}
        }

        self.status = next;
        self.status_changed_at = now;
        Ok(change)
    }

    /// Records the carrier batch the item was submitted in.
    pub fn assign_batch(&mut self, batch_id: impl Into<String>) {
        self.carrier_batch_id = Some(batch_id.into());
    }

    /// Records the carrier shipment bought for the item. Returns true if the
    /// value changed.
    pub fn assign_carrier_shipment(&mut self, id: CarrierShipmentId) -> bool {
        if self.carrier_shipment_id.as_ref() == Some(&id) {
            return false;
        }
        self.carrier_shipment_id = Some(id);
        true
    }

    /// True unless a shipment exists that has progressed past label
    /// generation.
    pub fn can_be_canceled(&self, shipment_status: Option<ShipmentStatus>) -> bool {
        LineItemStatus::cancellation_allowed_with(shipment_status)
    }

    /// Lists what prevents the buyer from confirming receipt.
    ///
    /// Advisory only: `receive` is guarded by the status alone.
    pub fn receipt_blockers(
        &self,
        order: &Order,
        listing: &Listing,
        has_shipment: bool,
    ) -> Vec<ReceiptBlocker> {
        let mut blockers = Vec::new();
        if !matches!(listing.status(), ListingStatus::Sold | ListingStatus::Shipped) {
            blockers.push(ReceiptBlocker::ListingNotSold(listing.status()));
        }
        if order.payment_reference().is_none() {
            blockers.push(ReceiptBlocker::PaymentMissing);
        }
        if !has_shipment {
            blockers.push(ReceiptBlocker::ShipmentMissing);
        }
        blockers
    }

    /// True when nothing blocks receipt.
    pub fn can_be_received(&self, order: &Order, listing: &Listing, has_shipment: bool) -> bool {
        self.receipt_blockers(order, listing, has_shipment).is_empty()
    }
}

/// A reason the item cannot be received yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ReceiptBlocker {
    ListingNotSold(ListingStatus),
    PaymentMissing,
    ShipmentMissing,
}

impl std::fmt::Display for ReceiptBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptBlocker::ListingNotSold(_) => write!(f, "This bundle can not be received yet."),
            ReceiptBlocker::PaymentMissing => write!(f, "No payment found for this bundle."),
            ReceiptBlocker::ShipmentMissing => write!(f, "No shipment found for this bundle."),
        }
    }
}
