use async_trait::async_trait;
use chrono::Duration;
use common::{LineItemId, ListingId, OrderId, ShipmentId};
use domain::{
    CarrierShipmentId, CompensationTask, Entity, LineItem, LineItemStatus, Listing, Order, Pickup,
    Shipment, ShipmentStatus, ShipmentTracker, StatusChange,
};
use uuid::Uuid;

use crate::{Lease, Result, StoreError, TransitionRecord};

/// A set of writes applied atomically.
///
/// Each entity is written at the version it carries plus one; the write
/// fails with a conflict if the stored version moved in the meantime. An
/// entity at the initial version is inserted and must not exist yet.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub orders: Vec<Order>,
    pub listings: Vec<Listing>,
    pub line_items: Vec<LineItem>,
    pub shipments: Vec<Shipment>,
    pub trackers: Vec<ShipmentTracker>,
    pub pickups: Vec<Pickup>,
    /// Pickups to delete, checked against their version.
    pub deleted_pickups: Vec<Pickup>,
    pub compensations: Vec<CompensationTask>,
    pub history: Vec<TransitionRecord>,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn with_listing(mut self, listing: Listing) -> Self {
        self.listings.push(listing);
        self
    }

    pub fn with_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn with_shipment(mut self, shipment: Shipment) -> Self {
        self.shipments.push(shipment);
        self
    }

    pub fn with_tracker(mut self, tracker: ShipmentTracker) -> Self {
        self.trackers.push(tracker);
        self
    }

    pub fn with_pickup(mut self, pickup: Pickup) -> Self {
        self.pickups.push(pickup);
        self
    }

    pub fn without_pickup(mut self, pickup: Pickup) -> Self {
        self.deleted_pickups.push(pickup);
        self
    }

    pub fn with_compensation(mut self, task: CompensationTask) -> Self {
        self.compensations.push(task);
        self
    }

    /// Appends a status change of `entity` to the history.
    pub fn record<E: Entity>(mut self, entity: &E, change: StatusChange) -> Self {
        self.history.push(TransitionRecord::for_entity(entity, change));
        self
    }

    /// Appends a status change if there is one.
    pub fn record_opt<E: Entity>(self, entity: &E, change: Option<StatusChange>) -> Self {
        match change {
            Some(change) => self.record(entity, change),
            None => self,
        }
    }

    /// Returns true if committing would write nothing.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.listings.is_empty()
            && self.line_items.is_empty()
            && self.shipments.is_empty()
            && self.trackers.is_empty()
            && self.pickups.is_empty()
            && self.deleted_pickups.is_empty()
            && self.compensations.is_empty()
            && self.history.is_empty()
    }

    /// Bumps the version of every written entity, as the store does on
    /// success.
    pub(crate) fn into_committed(mut self) -> Self {
        fn bump<E: Entity>(entities: &mut [E]) {
            for entity in entities {
                entity.set_version(entity.version().next());
            }
        }
        bump(&mut self.orders);
        bump(&mut self.listings);
        bump(&mut self.line_items);
        bump(&mut self.shipments);
        bump(&mut self.trackers);
        bump(&mut self.pickups);
        bump(&mut self.compensations);
        self
    }
}

/// Core trait for fulfillment store implementations.
///
/// All implementations must be thread-safe (Send + Sync) and give
/// [`FulfillmentStore::commit`] all-or-nothing semantics.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Applies all writes atomically.
    ///
    /// Returns the unit with every entity at its new version.
    async fn commit(&self, unit: UnitOfWork) -> Result<UnitOfWork>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>>;

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<LineItem>>;

    /// Line items in any of the given statuses, oldest first.
    async fn line_items_with_status(&self, statuses: &[LineItemStatus]) -> Result<Vec<LineItem>>;

    async fn get_shipment(&self, id: ShipmentId) -> Result<Option<Shipment>>;

    async fn shipment_by_carrier_id(&self, id: &CarrierShipmentId) -> Result<Option<Shipment>>;

    async fn shipment_for_line_item(&self, id: LineItemId) -> Result<Option<Shipment>>;

    async fn shipments_with_status(&self, statuses: &[ShipmentStatus]) -> Result<Vec<Shipment>>;

    async fn tracker_for_shipment(&self, id: ShipmentId) -> Result<Option<ShipmentTracker>>;

    async fn pickup_for_shipment(&self, id: ShipmentId) -> Result<Option<Pickup>>;

    /// Compensation tasks not yet resolved, oldest first.
    async fn pending_compensations(&self) -> Result<Vec<CompensationTask>>;

    /// Transition history of one entity, in commit order.
    async fn history(&self, entity_id: Uuid) -> Result<Vec<TransitionRecord>>;

    /// Takes the named lease if it is free, expired, or already ours.
    ///
    /// Returns `None` while someone else holds it.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>>;

    /// Releases a lease held by `lease.holder`. Releasing a lease that was
    /// taken over is a no-op.
    async fn release_lease(&self, lease: &Lease) -> Result<()>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait FulfillmentStoreExt: FulfillmentStore {
    /// Loads a line item or fails with `NotFound`.
    async fn require_line_item(&self, id: LineItemId) -> Result<LineItem> {
        self.get_line_item(id)
            .await?
            .ok_or(StoreError::NotFound {
                entity_type: LineItem::entity_type(),
                entity_id: id.as_uuid(),
            })
    }

    /// Loads an order or fails with `NotFound`.
    async fn require_order(&self, id: OrderId) -> Result<Order> {
        self.get_order(id).await?.ok_or(StoreError::NotFound {
            entity_type: Order::entity_type(),
            entity_id: id.as_uuid(),
        })
    }

    /// Loads a listing or fails with `NotFound`.
    async fn require_listing(&self, id: ListingId) -> Result<Listing> {
        self.get_listing(id).await?.ok_or(StoreError::NotFound {
            entity_type: Listing::entity_type(),
            entity_id: id.as_uuid(),
        })
    }
}

// Blanket implementation for all FulfillmentStore implementations
impl<T: FulfillmentStore + ?Sized> FulfillmentStoreExt for T {}
