//! Carrier gateway: postage, batches, pickups, refunds and tracking.

mod events;
mod http;
mod memory;
mod retrying;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use domain::{Address, CarrierShipmentId, CustomsDeclaration, Parcel};
use thiserror::Error;

pub use events::{CarrierEvent, parse_event};
pub use http::HttpCarrierGateway;
pub use memory::InMemoryCarrierGateway;
pub use retrying::RetryingCarrierGateway;
pub use types::{
    BatchShipment, BatchShipmentStatus, BatchState, CarrierBatch, CarrierObject, CarrierPickup,
    CarrierRate, CarrierShipment, CarrierTracker, CarrierTrackingDetail, DEFAULT_CARRIER,
    DEFAULT_SERVICE, PickupRate, PickupRequest, PostageLabel, RefundStatus, ShipmentDraft,
    ShipmentRequest, TrackingLocation,
};

/// Errors reported by a carrier gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarrierError {
    /// The carrier could not be reached or failed internally.
    #[error("carrier unavailable: {0}")]
    Transport(String),

    /// Too many requests.
    #[error("carrier rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// The carrier refused the request.
    #[error("carrier rejected request: {0}")]
    Rejected(String),

    #[error("carrier object not found: {0}")]
    NotFound(String),

    /// The response could not be decoded.
    #[error("unexpected carrier response: {0}")]
    Decode(String),
}

impl CarrierError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CarrierError::Transport(_) | CarrierError::RateLimited { .. }
        )
    }

    /// Wait requested by the carrier, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CarrierError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Operations the fulfillment workflows need from a shipping carrier.
#[async_trait]
pub trait CarrierGateway: Send + Sync {
    /// Registers an address, verifying deliverability.
    async fn create_address(&self, address: &Address) -> Result<CarrierObject, CarrierError>;

    async fn create_parcel(&self, parcel: &Parcel) -> Result<CarrierObject, CarrierError>;

    async fn create_customs_info(
        &self,
        customs: &CustomsDeclaration,
    ) -> Result<CarrierObject, CarrierError>;

    /// Creates a shipment, buying the preferred rate when `buy_label` is set.
    async fn create_shipment(
        &self,
        draft: &ShipmentDraft,
        buy_label: bool,
    ) -> Result<CarrierShipment, CarrierError>;

    async fn retrieve_shipment(
        &self,
        id: &CarrierShipmentId,
    ) -> Result<CarrierShipment, CarrierError>;

    /// Requests a refund for a purchased label.
    async fn refund_shipment(&self, id: &CarrierShipmentId) -> Result<RefundStatus, CarrierError>;

    async fn create_batch(&self, shipments: &[ShipmentRequest]) -> Result<CarrierBatch, CarrierError>;

    /// Buys postage for every shipment in a batch that is `created`.
    async fn buy_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError>;

    async fn retrieve_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError>;

    /// Books a pickup and buys its first offered rate.
    async fn create_and_buy_pickup(
        &self,
        request: &PickupRequest,
    ) -> Result<CarrierPickup, CarrierError>;

    /// Buys a pickup the carrier left unconfirmed.
    async fn buy_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError>;

    async fn cancel_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError>;

    async fn retrieve_tracker(&self, tracker_id: &str) -> Result<CarrierTracker, CarrierError>;

    /// Decodes a webhook body into a typed event.
    fn process_inbound_event(&self, payload: &[u8]) -> Result<CarrierEvent, CarrierError> {
        parse_event(payload)
    }
}
