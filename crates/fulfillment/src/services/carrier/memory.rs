use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use domain::{Address, CarrierShipmentId, CustomsDeclaration, Parcel};

use super::{
    BatchShipment, BatchShipmentStatus, BatchState, CarrierBatch, CarrierError, CarrierGateway,
    CarrierObject, CarrierPickup, CarrierRate, CarrierShipment, CarrierTracker,
    CarrierTrackingDetail, DEFAULT_CARRIER, DEFAULT_SERVICE, PickupRate, PickupRequest,
    PostageLabel, RefundStatus, ShipmentDraft, ShipmentRequest,
};

#[derive(Debug)]
struct BatchRecord {
    batch: CarrierBatch,
    polls_until_created: u32,
}

#[derive(Debug, Default)]
struct InMemoryCarrierState {
    next_id: u32,
    shipments: HashMap<CarrierShipmentId, CarrierShipment>,
    batches: HashMap<String, BatchRecord>,
    pickups: HashMap<String, CarrierPickup>,
    trackers: HashMap<String, CarrierTracker>,
    refunds: Vec<CarrierShipmentId>,
    buy_batch_calls: HashMap<String, u32>,
    failing_references: HashSet<String>,
    omitted_references: HashSet<String>,
    fail_on_create_batch: bool,
    fail_on_refund: bool,
    fail_on_pickup: bool,
    pickups_need_buy: bool,
    settle_after_polls: u32,
    never_settle: bool,
    transient_failures: u32,
}

impl InMemoryCarrierState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }

    fn check_transient(&mut self) -> Result<(), CarrierError> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(CarrierError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn new_shipment(&mut self, reference: &str) -> CarrierShipment {
        let id = CarrierShipmentId::new(self.next_id("shp"));
        let rate = |service: &str, price: &str| CarrierRate {
            id: format!("rate_{}_{service}", id.as_str()),
            carrier: Some(DEFAULT_CARRIER.to_string()),
            service: Some(service.to_string()),
            rate: Some(price.to_string()),
        };
        let shipment = CarrierShipment {
            id: id.clone(),
            reference: Some(reference.to_string()),
            status: Some("unknown".to_string()),
            tracking_code: None,
            postage_label: None,
            selected_rate: None,
            rates: vec![rate(DEFAULT_SERVICE, "9.35"), rate("First", "5.10")],
            tracker: None,
            refund_status: None,
        };
        self.shipments.insert(id, shipment.clone());
        shipment
    }

    /// Buys postage for a stored shipment and opens its tracker.
    fn buy_label(&mut self, id: &CarrierShipmentId) -> Option<CarrierShipment> {
        let tracker_id = self.next_id("trk");
        let shipment = self.shipments.get_mut(id)?;
        let tracking_code = format!("9400{}", id.as_str().trim_start_matches("shp_"));
        let tracker = CarrierTracker {
            id: tracker_id.clone(),
            shipment_id: Some(id.clone()),
            tracking_code: Some(tracking_code.clone()),
            status: "pre_transit".to_string(),
            public_url: Some(format!("https://track.example/{tracking_code}")),
            signed_by: None,
            est_delivery_date: None,
            tracking_details: Vec::new(),
            updated_at: Utc::now(),
        };
        shipment.selected_rate = shipment
            .preferred_rate(DEFAULT_CARRIER, DEFAULT_SERVICE)
            .cloned();
        shipment.postage_label = Some(PostageLabel {
            label_url: format!("https://labels.example/{}.png", id.as_str()),
        });
        shipment.tracking_code = Some(tracking_code);
        shipment.status = Some("pre_transit".to_string());
        shipment.tracker = Some(tracker.clone());
        let shipment = shipment.clone();
        self.trackers.insert(tracker_id, tracker);
        Some(shipment)
    }

    fn settle_purchase(&mut self, batch_id: &str) {
        let Some(record) = self.batches.get(batch_id) else {
            return;
        };
        let results: Vec<(CarrierShipmentId, bool)> = record
            .batch
            .shipments
            .iter()
            .map(|s| {
                let failed = s
                    .reference
                    .as_ref()
                    .is_some_and(|r| self.failing_references.contains(r));
                (s.id.clone(), failed)
            })
            .collect();

        let mut statuses = HashMap::new();
        for (id, failed) in results {
            let status = if failed {
                BatchShipmentStatus::PostagePurchaseFailed
            } else {
                self.buy_label(&id);
                BatchShipmentStatus::PostagePurchased
            };
            statuses.insert(id, status);
        }

        if let Some(record) = self.batches.get_mut(batch_id) {
            for shipment in &mut record.batch.shipments {
                if let Some(status) = statuses.get(&shipment.id) {
                    shipment.batch_status = *status;
                }
            }
            record.batch.state = BatchState::Purchased;
        }
    }
}

/// In-memory carrier for tests and local runs.
///
/// Batches become buy-ready after a configurable number of polls and
/// resolve their purchase on the first poll after `buy_batch`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCarrierGateway {
    state: Arc<RwLock<InMemoryCarrierState>>,
}

impl InMemoryCarrierGateway {
    /// Creates a new in-memory carrier gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryCarrierState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryCarrierState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` calls with a transport error.
    pub fn fail_next_calls(&self, count: u32) {
        self.write().transient_failures = count;
    }

    pub fn set_fail_on_create_batch(&self, fail: bool) {
        self.write().fail_on_create_batch = fail;
    }

    /// Makes postage purchase fail for shipments with this reference.
    pub fn fail_purchase_for(&self, reference: impl Into<String>) {
        self.write().failing_references.insert(reference.into());
    }

    /// Leaves shipments with this reference out of created batches.
    pub fn omit_from_batch(&self, reference: impl Into<String>) {
        self.write().omitted_references.insert(reference.into());
    }

    /// Number of `retrieve_batch` polls before a new batch is `created`.
    pub fn set_settle_after_polls(&self, polls: u32) {
        self.write().settle_after_polls = polls;
    }

    /// Keeps bought batches in `purchasing` forever.
    pub fn set_never_settle(&self, never: bool) {
        self.write().never_settle = never;
    }

    /// New pickups come back `unknown` and need an explicit buy.
    pub fn set_pickups_need_buy(&self, need_buy: bool) {
        self.write().pickups_need_buy = need_buy;
    }

    pub fn set_fail_on_refund(&self, fail: bool) {
        self.write().fail_on_refund = fail;
    }

    pub fn set_fail_on_pickup(&self, fail: bool) {
        self.write().fail_on_pickup = fail;
    }

    /// Creates a shipment with purchased postage, as a webhook would
    /// describe it.
    pub fn purchased_shipment(&self, reference: &str) -> CarrierShipment {
        let mut state = self.write();
        let shipment = state.new_shipment(reference);
        state.buy_label(&shipment.id).unwrap_or(shipment)
    }

    /// Moves a shipment's tracker to `status`, strictly later than its
    /// previous update.
    pub fn set_tracker_status(&self, id: &CarrierShipmentId, status: &str) -> Option<CarrierTracker> {
        let mut state = self.write();
        let shipment = state.shipments.get_mut(id)?;
        let tracker = shipment.tracker.as_mut()?;
        let updated_at = (tracker.updated_at + Duration::milliseconds(1)).max(Utc::now());
        tracker.status = status.to_string();
        tracker.updated_at = updated_at;
        tracker.tracking_details.push(CarrierTrackingDetail {
            message: Some(format!("Status changed to {status}")),
            status: status.to_string(),
            datetime: updated_at,
            tracking_location: None,
        });
        shipment.status = Some(status.to_string());
        let tracker = tracker.clone();
        state.trackers.insert(tracker.id.clone(), tracker.clone());
        Some(tracker)
    }

    pub fn shipment(&self, id: &CarrierShipmentId) -> Option<CarrierShipment> {
        self.read().shipments.get(id).cloned()
    }

    pub fn shipment_by_reference(&self, reference: &str) -> Option<CarrierShipment> {
        self.read()
            .shipments
            .values()
            .find(|s| s.reference.as_deref() == Some(reference))
            .cloned()
    }

    pub fn batch(&self, batch_id: &str) -> Option<CarrierBatch> {
        self.read().batches.get(batch_id).map(|r| r.batch.clone())
    }

    pub fn batch_count(&self) -> usize {
        self.read().batches.len()
    }

    /// How often `buy_batch` was called for the batch.
    pub fn buy_batch_calls(&self, batch_id: &str) -> u32 {
        self.read()
            .buy_batch_calls
            .get(batch_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn has_refund(&self, id: &CarrierShipmentId) -> bool {
        self.read().refunds.contains(id)
    }

    pub fn refund_count(&self) -> usize {
        self.read().refunds.len()
    }

    pub fn pickup(&self, pickup_id: &str) -> Option<CarrierPickup> {
        self.read().pickups.get(pickup_id).cloned()
    }
}

#[async_trait]
impl CarrierGateway for InMemoryCarrierGateway {
    async fn create_address(&self, _address: &Address) -> Result<CarrierObject, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        Ok(CarrierObject {
            id: state.next_id("adr"),
        })
    }

    async fn create_parcel(&self, _parcel: &Parcel) -> Result<CarrierObject, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        Ok(CarrierObject {
            id: state.next_id("prcl"),
        })
    }

    async fn create_customs_info(
        &self,
        _customs: &CustomsDeclaration,
    ) -> Result<CarrierObject, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        Ok(CarrierObject {
            id: state.next_id("cstinfo"),
        })
    }

    async fn create_shipment(
        &self,
        draft: &ShipmentDraft,
        buy_label: bool,
    ) -> Result<CarrierShipment, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        let shipment = state.new_shipment(&draft.reference);
        if !buy_label {
            return Ok(shipment);
        }
        if state.failing_references.contains(&draft.reference) {
            return Err(CarrierError::Rejected(
                "postage could not be purchased".to_string(),
            ));
        }
        state
            .buy_label(&shipment.id)
            .ok_or_else(|| CarrierError::NotFound(shipment.id.to_string()))
    }

    async fn retrieve_shipment(
        &self,
        id: &CarrierShipmentId,
    ) -> Result<CarrierShipment, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        state
            .shipments
            .get(id)
            .cloned()
            .ok_or_else(|| CarrierError::NotFound(id.to_string()))
    }

    async fn refund_shipment(&self, id: &CarrierShipmentId) -> Result<RefundStatus, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        if state.fail_on_refund {
            return Err(CarrierError::Transport(
                "refund service unavailable".to_string(),
            ));
        }
        let shipment = state
            .shipments
            .get_mut(id)
            .ok_or_else(|| CarrierError::NotFound(id.to_string()))?;
        shipment.refund_status = Some(RefundStatus::Submitted);
        if !state.refunds.contains(id) {
            state.refunds.push(id.clone());
        }
        Ok(RefundStatus::Submitted)
    }

    async fn create_batch(&self, shipments: &[ShipmentRequest]) -> Result<CarrierBatch, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        if state.fail_on_create_batch {
            return Err(CarrierError::Rejected("batch could not be created".to_string()));
        }

        let mut entries = Vec::new();
        for request in shipments {
            if state.omitted_references.contains(&request.reference) {
                continue;
            }
            let shipment = state.new_shipment(&request.reference);
            entries.push(BatchShipment {
                id: shipment.id,
                reference: Some(request.reference.clone()),
                batch_status: BatchShipmentStatus::Queued,
                batch_message: None,
            });
        }

        let polls = state.settle_after_polls;
        let batch = CarrierBatch {
            id: state.next_id("batch"),
            state: if polls == 0 {
                BatchState::Created
            } else {
                BatchState::Creating
            },
            shipments: entries,
        };
        state.batches.insert(
            batch.id.clone(),
            BatchRecord {
                batch: batch.clone(),
                polls_until_created: polls,
            },
        );
        Ok(batch)
    }

    async fn buy_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        *state.buy_batch_calls.entry(batch_id.to_string()).or_default() += 1;

        let record = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CarrierError::NotFound(batch_id.to_string()))?;
        if !record.batch.state.is_buy_ready() {
            return Err(CarrierError::Rejected(format!(
                "batch {batch_id} is not ready for purchase"
            )));
        }
        record.batch.state = BatchState::Purchasing;
        Ok(record.batch.clone())
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        let never_settle = state.never_settle;

        let record = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CarrierError::NotFound(batch_id.to_string()))?;
        let settle = match record.batch.state {
            BatchState::Creating => {
                record.polls_until_created = record.polls_until_created.saturating_sub(1);
                if record.polls_until_created == 0 {
                    record.batch.state = BatchState::Created;
                }
                false
            }
            BatchState::Purchasing => !never_settle,
            _ => false,
        };
        if settle {
            state.settle_purchase(batch_id);
        }

        state
            .batches
            .get(batch_id)
            .map(|r| r.batch.clone())
            .ok_or_else(|| CarrierError::NotFound(batch_id.to_string()))
    }

    async fn create_and_buy_pickup(
        &self,
        request: &PickupRequest,
    ) -> Result<CarrierPickup, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        if state.fail_on_pickup {
            return Err(CarrierError::Rejected("no pickup rates available".to_string()));
        }
        if !state.shipments.contains_key(&request.shipment_id) {
            return Err(CarrierError::NotFound(request.shipment_id.to_string()));
        }

        let status = if state.pickups_need_buy {
            "unknown"
        } else {
            "scheduled"
        };
        let pickup = CarrierPickup {
            id: state.next_id("pickup"),
            status: status.to_string(),
            reference: Some(request.reference.clone()),
            pickup_rates: vec![PickupRate {
                carrier: DEFAULT_CARRIER.to_string(),
                service: "NextDay".to_string(),
            }],
        };
        state.pickups.insert(pickup.id.clone(), pickup.clone());
        Ok(pickup)
    }

    async fn buy_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        let pickup = state
            .pickups
            .get_mut(pickup_id)
            .ok_or_else(|| CarrierError::NotFound(pickup_id.to_string()))?;
        pickup.status = "scheduled".to_string();
        Ok(pickup.clone())
    }

    async fn cancel_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        if state.fail_on_pickup {
            return Err(CarrierError::Transport("pickup service unavailable".to_string()));
        }
        let pickup = state
            .pickups
            .get_mut(pickup_id)
            .ok_or_else(|| CarrierError::NotFound(pickup_id.to_string()))?;
        pickup.status = "canceled".to_string();
        Ok(pickup.clone())
    }

    async fn retrieve_tracker(&self, tracker_id: &str) -> Result<CarrierTracker, CarrierError> {
        let mut state = self.write();
        state.check_transient()?;
        state
            .trackers
            .get(tracker_id)
            .cloned()
            .ok_or_else(|| CarrierError::NotFound(tracker_id.to_string()))
    }
}
