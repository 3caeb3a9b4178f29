//! Orders and listings as fulfillment sees them.
//!
//! Both are owned by checkout and the catalog; fulfillment reads them and
//! only ever moves a listing from sold to shipped.

use chrono::{DateTime, Utc};
use common::{ListingId, OrderId, UserId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, StatusChange};
use crate::value_objects::{Address, Money, Parcel};

/// A buyer's paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    buyer_id: UserId,
    buyer_name: String,
    shipping_address: Address,
    /// Reference of the captured payment at the payment gateway.
    payment_reference: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    version: Version,
}

impl Entity for Order {
    fn entity_type() -> &'static str {
        "Order"
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

impl Order {
    /// Creates an order record.
    pub fn new(
        id: OrderId,
        buyer_id: UserId,
        buyer_name: impl Into<String>,
        shipping_address: Address,
        payment_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            buyer_id,
            buyer_name: buyer_name.into(),
            shipping_address,
            payment_reference,
            created_at: now,
            version: Version::initial(),
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn buyer_id(&self) -> UserId {
        self.buyer_id
    }

    pub fn buyer_name(&self) -> &str {
        &self.buyer_name
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    /// Destination address for the buyer's shipment.
    pub fn destination(&self) -> Address {
        self.shipping_address.addressed_to(self.buyer_name.clone())
    }
}

/// Lifecycle of a listing on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Published,
    Sold,
    Shipped,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Published => "published",
            ListingStatus::Sold => "sold",
            ListingStatus::Shipped => "shipped",
        }
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The bundle a line item bought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    id: ListingId,
    title: String,
    seller_id: UserId,
    seller_address: Address,
    status: ListingStatus,
    /// What the buyer paid, refunded on cancellation.
    buyer_price: Money,
    /// What the seller receives, declared on customs forms.
    seller_price: Money,
    weight_oz: f64,
    predefined_package: Option<String>,
    #[serde(default)]
    version: Version,
}

impl Entity for Listing {
    fn entity_type() -> &'static str {
        "Listing"
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

impl Listing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ListingId,
        title: impl Into<String>,
        seller_id: UserId,
        seller_address: Address,
        buyer_price: Money,
        seller_price: Money,
        weight_oz: f64,
        predefined_package: Option<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            seller_id,
            seller_address,
            status: ListingStatus::Published,
            buyer_price,
            seller_price,
            weight_oz,
            predefined_package,
            version: Version::initial(),
        }
    }

    pub fn id(&self) -> ListingId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn seller_id(&self) -> UserId {
        self.seller_id
    }

    pub fn seller_address(&self) -> &Address {
        &self.seller_address
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn buyer_price(&self) -> Money {
        self.buyer_price
    }

    pub fn seller_price(&self) -> Money {
        self.seller_price
    }

    pub fn weight_oz(&self) -> f64 {
        self.weight_oz
    }

    /// Parcel for the listing's package.
    pub fn parcel(&self) -> Parcel {
        Parcel::new(self.weight_oz, self.predefined_package.clone())
    }

    /// Marks the listing sold at checkout.
    pub fn mark_sold(&mut self) {
        self.status = ListingStatus::Sold;
    }

    /// Marks the listing shipped once the carrier reports delivery.
    ///
    /// Returns `None` when the listing was already shipped.
    pub fn mark_shipped(&mut self, now: DateTime<Utc>) -> Option<StatusChange> {
        if self.status == ListingStatus::Shipped {
            return None;
        }
        let change = StatusChange::new("mark_shipped", self.status, ListingStatus::Shipped, now);
        self.status = ListingStatus::Shipped;
        Some(change)
    }
}
