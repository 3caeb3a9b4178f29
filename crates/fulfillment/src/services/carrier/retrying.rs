use async_trait::async_trait;
use domain::{Address, CarrierShipmentId, CustomsDeclaration, Parcel};

use super::{
    CarrierBatch, CarrierError, CarrierEvent, CarrierGateway, CarrierObject, CarrierPickup,
    CarrierShipment, CarrierTracker, PickupRequest, RefundStatus, ShipmentDraft, ShipmentRequest,
};
use crate::retry::RetryPolicy;

/// Wraps a gateway and retries its idempotent calls.
///
/// Purchases (batch creation and buy, shipment buy, pickup booking) go
/// through exactly once: a retry after a lost response could buy twice.
#[derive(Debug, Clone)]
pub struct RetryingCarrierGateway<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: CarrierGateway> RetryingCarrierGateway<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CarrierGateway> CarrierGateway for RetryingCarrierGateway<C> {
    async fn create_address(&self, address: &Address) -> Result<CarrierObject, CarrierError> {
        self.policy
            .run("create_address", || self.inner.create_address(address))
            .await
    }

    async fn create_parcel(&self, parcel: &Parcel) -> Result<CarrierObject, CarrierError> {
        self.policy
            .run("create_parcel", || self.inner.create_parcel(parcel))
            .await
    }

    async fn create_customs_info(
        &self,
        customs: &CustomsDeclaration,
    ) -> Result<CarrierObject, CarrierError> {
        self.policy
            .run("create_customs_info", || self.inner.create_customs_info(customs))
            .await
    }

    async fn create_shipment(
        &self,
        draft: &ShipmentDraft,
        buy_label: bool,
    ) -> Result<CarrierShipment, CarrierError> {
        if buy_label {
            return self.inner.create_shipment(draft, true).await;
        }
        self.policy
            .run("create_shipment", || self.inner.create_shipment(draft, false))
            .await
    }

    async fn retrieve_shipment(
        &self,
        id: &CarrierShipmentId,
    ) -> Result<CarrierShipment, CarrierError> {
        self.policy
            .run("retrieve_shipment", || self.inner.retrieve_shipment(id))
            .await
    }

    async fn refund_shipment(&self, id: &CarrierShipmentId) -> Result<RefundStatus, CarrierError> {
        self.policy
            .run("refund_shipment", || self.inner.refund_shipment(id))
            .await
    }

    async fn create_batch(&self, shipments: &[ShipmentRequest]) -> Result<CarrierBatch, CarrierError> {
        self.inner.create_batch(shipments).await
    }

    async fn buy_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        self.inner.buy_batch(batch_id).await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        self.policy
            .run("retrieve_batch", || self.inner.retrieve_batch(batch_id))
            .await
    }

    async fn create_and_buy_pickup(
        &self,
        request: &PickupRequest,
    ) -> Result<CarrierPickup, CarrierError> {
        self.inner.create_and_buy_pickup(request).await
    }

    async fn buy_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        self.inner.buy_pickup(pickup_id).await
    }

    async fn cancel_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        self.policy
            .run("cancel_pickup", || self.inner.cancel_pickup(pickup_id))
            .await
    }

    async fn retrieve_tracker(&self, tracker_id: &str) -> Result<CarrierTracker, CarrierError> {
        self.policy
            .run("retrieve_tracker", || self.inner.retrieve_tracker(tracker_id))
            .await
    }

    fn process_inbound_event(&self, payload: &[u8]) -> Result<CarrierEvent, CarrierError> {
        self.inner.process_inbound_event(payload)
    }
}
