use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{LineItemId, ListingId, OrderId, ShipmentId, Version};
use domain::{
    CarrierShipmentId, CompensationTask, Entity, LineItem, LineItemStatus, Listing, Order, Pickup,
    Shipment, ShipmentStatus, ShipmentTracker,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Lease, Result, StoreError, TransitionRecord,
    store::{FulfillmentStore, UnitOfWork},
};

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    listings: HashMap<Uuid, Listing>,
    line_items: HashMap<Uuid, LineItem>,
    shipments: HashMap<Uuid, Shipment>,
    trackers: HashMap<Uuid, ShipmentTracker>,
    pickups: HashMap<Uuid, Pickup>,
    compensations: HashMap<Uuid, CompensationTask>,
    history: Vec<TransitionRecord>,
    leases: HashMap<String, Lease>,
}

fn check_version<E: Entity>(table: &HashMap<Uuid, E>, entity: &E) -> Result<()> {
    let stored = table
        .get(&entity.entity_id())
        .map(|stored| stored.version())
        .unwrap_or(Version::initial());
    if stored != entity.version() {
        return Err(StoreError::ConcurrencyConflict {
            entity_type: E::entity_type(),
            entity_id: entity.entity_id(),
            expected: entity.version(),
        });
    }
    Ok(())
}

fn put<E: Entity>(table: &mut HashMap<Uuid, E>, entity: &E) {
    let mut stored = entity.clone();
    stored.set_version(entity.version().next());
    table.insert(stored.entity_id(), stored);
}

impl Tables {
    /// Validates every write before anything is applied.
    fn validate(&self, unit: &UnitOfWork) -> Result<()> {
        unit.orders.iter().try_for_each(|e| check_version(&self.orders, e))?;
        unit.listings.iter().try_for_each(|e| check_version(&self.listings, e))?;
        unit.line_items.iter().try_for_each(|e| check_version(&self.line_items, e))?;
        unit.trackers.iter().try_for_each(|e| check_version(&self.trackers, e))?;
        unit.pickups.iter().try_for_each(|e| check_version(&self.pickups, e))?;
        unit.compensations
            .iter()
            .try_for_each(|e| check_version(&self.compensations, e))?;

        for pickup in &unit.deleted_pickups {
            if !self.pickups.contains_key(&pickup.entity_id()) {
                return Err(StoreError::NotFound {
                    entity_type: Pickup::entity_type(),
                    entity_id: pickup.entity_id(),
                });
            }
            check_version(&self.pickups, pickup)?;
        }

        // Uniqueness is judged against the state after the unit applies, so a
        // unit may move a line item from one shipment to another.
        let mut after: HashMap<Uuid, &Shipment> =
            self.shipments.iter().map(|(id, s)| (*id, s)).collect();
        for shipment in &unit.shipments {
            check_version(&self.shipments, shipment)?;
            after.insert(shipment.entity_id(), shipment);
        }
        for shipment in &unit.shipments {
            for other in after.values() {
                if other.id() == shipment.id() {
                    continue;
                }
                if other.carrier_shipment_id() == shipment.carrier_shipment_id() {
                    return Err(StoreError::DuplicateCarrierShipment(
                        shipment.carrier_shipment_id().clone(),
                    ));
                }
                if let Some(line_item_id) = shipment.line_item_id()
                    && other.line_item_id() == Some(line_item_id)
                {
                    return Err(StoreError::DuplicateShipmentForLineItem(line_item_id));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, unit: &UnitOfWork) {
        unit.orders.iter().for_each(|e| put(&mut self.orders, e));
        unit.listings.iter().for_each(|e| put(&mut self.listings, e));
        unit.line_items.iter().for_each(|e| put(&mut self.line_items, e));
        unit.shipments.iter().for_each(|e| put(&mut self.shipments, e));
        unit.trackers.iter().for_each(|e| put(&mut self.trackers, e));
        unit.pickups.iter().for_each(|e| put(&mut self.pickups, e));
        unit.compensations
            .iter()
            .for_each(|e| put(&mut self.compensations, e));
        for pickup in &unit.deleted_pickups {
            self.pickups.remove(&pickup.entity_id());
        }
        self.history.extend(unit.history.iter().cloned());
    }
}

/// In-memory fulfillment store.
///
/// Holds everything behind one lock, so a commit is trivially atomic. It
/// enforces the same version checks and uniqueness rules as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryFulfillmentStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryFulfillmentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored shipments.
    pub async fn shipment_count(&self) -> usize {
        self.tables.read().await.shipments.len()
    }

    /// Returns the number of history records.
    pub async fn history_len(&self) -> usize {
        self.tables.read().await.history.len()
    }

    /// Clears all data.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

fn sorted<E, K: Ord>(mut items: Vec<E>, key: impl Fn(&E) -> K) -> Vec<E> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl FulfillmentStore for InMemoryFulfillmentStore {
    async fn commit(&self, unit: UnitOfWork) -> Result<UnitOfWork> {
        let mut tables = self.tables.write().await;
        tables.validate(&unit)?;
        tables.apply(&unit);
        Ok(unit.into_committed())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id.as_uuid()).cloned())
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        Ok(self.tables.read().await.listings.get(&id.as_uuid()).cloned())
    }

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<LineItem>> {
        Ok(self.tables.read().await.line_items.get(&id.as_uuid()).cloned())
    }

    async fn line_items_with_status(&self, statuses: &[LineItemStatus]) -> Result<Vec<LineItem>> {
        let tables = self.tables.read().await;
        let items = tables
            .line_items
            .values()
            .filter(|item| statuses.contains(&item.status()))
            .cloned()
            .collect();
        Ok(sorted(items, |item| (item.created_at(), item.id())))
    }

    async fn get_shipment(&self, id: ShipmentId) -> Result<Option<Shipment>> {
        Ok(self.tables.read().await.shipments.get(&id.as_uuid()).cloned())
    }

    async fn shipment_by_carrier_id(&self, id: &CarrierShipmentId) -> Result<Option<Shipment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .shipments
            .values()
            .find(|s| s.carrier_shipment_id() == id)
            .cloned())
    }

    async fn shipment_for_line_item(&self, id: LineItemId) -> Result<Option<Shipment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .shipments
            .values()
            .find(|s| s.line_item_id() == Some(id))
            .cloned())
    }

    async fn shipments_with_status(&self, statuses: &[ShipmentStatus]) -> Result<Vec<Shipment>> {
        let tables = self.tables.read().await;
        let shipments = tables
            .shipments
            .values()
            .filter(|s| statuses.contains(&s.status()))
            .cloned()
            .collect();
        Ok(sorted(shipments, |s| (s.created_at(), s.id())))
    }

    async fn tracker_for_shipment(&self, id: ShipmentId) -> Result<Option<ShipmentTracker>> {
        Ok(self.tables.read().await.trackers.get(&id.as_uuid()).cloned())
    }

    async fn pickup_for_shipment(&self, id: ShipmentId) -> Result<Option<Pickup>> {
        Ok(self.tables.read().await.pickups.get(&id.as_uuid()).cloned())
    }

    async fn pending_compensations(&self) -> Result<Vec<CompensationTask>> {
        let tables = self.tables.read().await;
        let tasks = tables
            .compensations
            .values()
            .filter(|task| task.is_pending())
            .cloned()
            .collect();
        Ok(sorted(tasks, |task| task.id()))
    }

    async fn history(&self, entity_id: Uuid) -> Result<Vec<TransitionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|record| record.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        if let Some(current) = tables.leases.get(name)
            && current.holder != holder
            && !current.is_expired(now)
        {
            return Ok(None);
        }
        let lease = Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        tables.leases.insert(name.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .leases
            .get(&lease.name)
            .is_some_and(|current| current.holder == lease.holder)
        {
            tables.leases.remove(&lease.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Address, LineItemCommand, Money, TransitionGuards};

    fn address() -> Address {
        Address {
            name: "Sam".into(),
            company: None,
            street1: "1 Elm".into(),
            street2: None,
            city: "Austin".into(),
            state: "TX".into(),
            zip: "73301".into(),
            country: "US".into(),
            phone: None,
        }
    }

    fn line_item() -> LineItem {
        LineItem::new(LineItemId::new(), OrderId::new(), ListingId::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_commit_bumps_versions() {
        let store = InMemoryFulfillmentStore::new();
        let item = line_item();

        let committed = store
            .commit(UnitOfWork::new().with_line_item(item.clone()))
            .await
            .unwrap();
        assert_eq!(committed.line_items[0].version(), Version::new(1));

        let loaded = store.get_line_item(item.id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(1));
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = InMemoryFulfillmentStore::new();
        let item = line_item();
        store
            .commit(UnitOfWork::new().with_line_item(item.clone()))
            .await
            .unwrap();

        let mut first = store.get_line_item(item.id()).await.unwrap().unwrap();
        let mut second = first.clone();
        let now = Utc::now();
        first
            .apply(&LineItemCommand::WaitToPrintLabel, &TransitionGuards::default(), now)
            .unwrap();
        second
            .apply(&LineItemCommand::ConfirmToShip, &TransitionGuards::default(), now)
            .unwrap();

        store
            .commit(UnitOfWork::new().with_line_item(first))
            .await
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().with_line_item(second))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get_line_item(item.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), LineItemStatus::LabelPending);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let store = InMemoryFulfillmentStore::new();
        let item = line_item();
        store
            .commit(UnitOfWork::new().with_line_item(item.clone()))
            .await
            .unwrap();

        let listing = Listing::new(
            ListingId::new(),
            "t",
            common::UserId::new(),
            address(),
            Money::from_cents(1),
            Money::from_cents(1),
            1.0,
            None,
        );
        // The stale line item makes the whole unit fail, listing included
        let result = store
            .commit(
                UnitOfWork::new()
                    .with_listing(listing.clone())
                    .with_line_item(item),
            )
            .await;
        assert!(result.is_err());
        assert!(store.get_listing(listing.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_carrier_shipment_is_rejected() {
        let store = InMemoryFulfillmentStore::new();
        let now = Utc::now();
        let first = Shipment::new(
            CarrierShipmentId::new("shp_dup"),
            None,
            ShipmentStatus::LabelGenerated,
            now,
        );
        let second = Shipment::new(
            CarrierShipmentId::new("shp_dup"),
            None,
            ShipmentStatus::LabelGenerated,
            now,
        );
        store
            .commit(UnitOfWork::new().with_shipment(first))
            .await
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().with_shipment(second))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCarrierShipment(_)));
        assert_eq!(store.shipment_count().await, 1);
    }

    #[tokio::test]
    async fn test_one_shipment_per_line_item() {
        let store = InMemoryFulfillmentStore::new();
        let owner = LineItemId::new();
        let now = Utc::now();
        store
            .commit(UnitOfWork::new().with_shipment(Shipment::new(
                CarrierShipmentId::new("shp_a"),
                Some(owner),
                ShipmentStatus::LabelGenerated,
                now,
            )))
            .await
            .unwrap();
        let err = store
            .commit(UnitOfWork::new().with_shipment(Shipment::new(
                CarrierShipmentId::new("shp_b"),
                Some(owner),
                ShipmentStatus::LabelGenerated,
                now,
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateShipmentForLineItem(id) if id == owner));
    }

    #[tokio::test]
    async fn test_line_item_can_move_to_another_shipment() {
        let store = InMemoryFulfillmentStore::new();
        let owner = LineItemId::new();
        let now = Utc::now();
        let committed = store
            .commit(UnitOfWork::new().with_shipment(Shipment::new(
                CarrierShipmentId::new("shp_old"),
                Some(owner),
                ShipmentStatus::LabelGenerated,
                now,
            )))
            .await
            .unwrap();

        let mut old = committed.shipments[0].clone();
        old.detach_line_item();
        let new = Shipment::new(
            CarrierShipmentId::new("shp_new"),
            Some(owner),
            ShipmentStatus::LabelGenerated,
            now,
        );
        store
            .commit(UnitOfWork::new().with_shipment(old).with_shipment(new))
            .await
            .unwrap();

        let current = store.shipment_for_line_item(owner).await.unwrap().unwrap();
        assert_eq!(current.carrier_shipment_id().as_str(), "shp_new");
    }

    #[tokio::test]
    async fn test_history_is_written_with_the_unit() {
        let store = InMemoryFulfillmentStore::new();
        let mut item = line_item();
        let change = item
            .apply(&LineItemCommand::ConfirmToShip, &TransitionGuards::default(), Utc::now())
            .unwrap();
        store
            .commit(UnitOfWork::new().with_line_item(item.clone()).record(&item, change))
            .await
            .unwrap();

        let history = store.history(item.id().as_uuid()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "confirm_to_ship");
        assert_eq!(history[0].to_status, "ready_to_ship");
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released_or_expired() {
        let store = InMemoryFulfillmentStore::new();
        let ttl = Duration::minutes(5);

        let lease = store
            .try_acquire_lease("batch_submission", "run-a", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(
            store
                .try_acquire_lease("batch_submission", "run-b", ttl)
                .await
                .unwrap()
                .is_none()
        );

        store.release_lease(&lease).await.unwrap();
        assert!(
            store
                .try_acquire_lease("batch_submission", "run-b", ttl)
                .await
                .unwrap()
                .is_some()
        );

        // run-b's lease expired immediately, so run-c may take it over
        store
            .try_acquire_lease("reconciliation", "run-b", Duration::zero())
            .await
            .unwrap();
        assert!(
            store
                .try_acquire_lease("reconciliation", "run-c", ttl)
                .await
                .unwrap()
                .is_some()
        );
    }
}
