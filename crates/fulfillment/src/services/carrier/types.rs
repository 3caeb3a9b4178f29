//! Carrier request and response objects.
//!
//! Responses mirror the carrier's JSON so the HTTP gateway can decode them
//! directly; unknown fields are ignored.

use chrono::{DateTime, Utc};
use domain::{
    Address, CarrierShipmentId, CustomsDeclaration, Parcel, TrackerUpdate, TrackingDetail,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CARRIER: &str = "USPS";
pub const DEFAULT_SERVICE: &str = "Priority";

/// A shipment to buy postage for, described inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub reference: String,
    pub to_address: Address,
    pub from_address: Address,
    pub parcel: Parcel,
    pub customs_info: Option<CustomsDeclaration>,
    pub carrier: String,
    pub service: String,
}

/// A shipment assembled from objects already registered at the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDraft {
    pub reference: String,
    pub to_address: CarrierObject,
    pub from_address: CarrierObject,
    pub parcel: CarrierObject,
    pub customs_info: Option<CarrierObject>,
    pub carrier: String,
    pub service: String,
}

/// Handle to an object created at the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierObject {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostageLabel {
    pub label_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierRate {
    pub id: String,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub rate: Option<String>,
}

impl CarrierRate {
    /// Numeric price, when the carrier sent a parsable one.
    pub fn amount(&self) -> Option<f64> {
        self.rate.as_deref().and_then(|r| r.parse().ok())
    }
}

/// A shipment as the carrier reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierShipment {
    pub id: CarrierShipmentId,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub postage_label: Option<PostageLabel>,
    #[serde(default)]
    pub selected_rate: Option<CarrierRate>,
    #[serde(default)]
    pub rates: Vec<CarrierRate>,
    #[serde(default)]
    pub tracker: Option<CarrierTracker>,
    #[serde(default)]
    pub refund_status: Option<RefundStatus>,
}

impl CarrierShipment {
    pub fn label_url(&self) -> Option<&str> {
        self.postage_label.as_ref().map(|l| l.label_url.as_str())
    }

    pub fn rate_id(&self) -> Option<&str> {
        self.selected_rate.as_ref().map(|r| r.id.as_str())
    }

    /// The rate to buy: the requested carrier and service if offered,
    /// otherwise the cheapest.
    pub fn preferred_rate(&self, carrier: &str, service: &str) -> Option<&CarrierRate> {
        self.rates
            .iter()
            .find(|r| r.carrier.as_deref() == Some(carrier) && r.service.as_deref() == Some(service))
            .or_else(|| {
                self.rates.iter().min_by(|a, b| {
                    let a = a.amount().unwrap_or(f64::MAX);
                    let b = b.amount().unwrap_or(f64::MAX);
                    a.total_cmp(&b)
                })
            })
    }
}

/// Lifecycle of a carrier batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Creating,
    CreationFailed,
    Created,
    Purchasing,
    PurchaseFailed,
    Purchased,
    LabelGenerating,
    LabelGenerated,
    #[serde(other)]
    Unknown,
}

impl BatchState {
    /// Postage may be bought.
    pub fn is_buy_ready(&self) -> bool {
        matches!(self, BatchState::Created)
    }

    /// The carrier will not change the per-shipment results any more.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BatchState::Purchased
                | BatchState::PurchaseFailed
                | BatchState::LabelGenerating
                | BatchState::LabelGenerated
                | BatchState::CreationFailed
        )
    }
}

/// Per-shipment result inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchShipmentStatus {
    Queued,
    PostagePurchased,
    #[serde(alias = "postage_purchased_failed")]
    PostagePurchaseFailed,
    CreationFailed,
    #[serde(other)]
    Unknown,
}

impl BatchShipmentStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BatchShipmentStatus::PostagePurchaseFailed | BatchShipmentStatus::CreationFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchShipment {
    pub id: CarrierShipmentId,
    #[serde(default)]
    pub reference: Option<String>,
    pub batch_status: BatchShipmentStatus,
    #[serde(default)]
    pub batch_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierBatch {
    pub id: String,
    pub state: BatchState,
    #[serde(default)]
    pub shipments: Vec<BatchShipment>,
}

impl CarrierBatch {
    /// Results are final: the batch reached a final state, or no shipment
    /// is still queued after purchase began.
    pub fn is_settled(&self) -> bool {
        if self.state.is_final() {
            return true;
        }
        matches!(self.state, BatchState::Purchasing)
            && !self
                .shipments
                .iter()
                .any(|s| s.batch_status == BatchShipmentStatus::Queued)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingLocation {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

impl TrackingLocation {
    fn describe(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.city, &self.state, &self.zip, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierTrackingDetail {
    #[serde(default)]
    pub message: Option<String>,
    pub status: String,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub tracking_location: Option<TrackingLocation>,
}

/// A tracker as the carrier reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierTracker {
    pub id: String,
    #[serde(default)]
    pub shipment_id: Option<CarrierShipmentId>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    pub status: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub signed_by: Option<String>,
    #[serde(default)]
    pub est_delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracking_details: Vec<CarrierTrackingDetail>,
    pub updated_at: DateTime<Utc>,
}

impl CarrierTracker {
    pub fn to_update(&self) -> TrackerUpdate {
        TrackerUpdate {
            carrier_tracker_id: self.id.clone(),
            tracking_code: self.tracking_code.clone(),
            public_url: self.public_url.clone(),
            status: self.status.clone(),
            signed_by: self.signed_by.clone(),
            est_delivery_at: self.est_delivery_date,
            details: self
                .tracking_details
                .iter()
                .map(|d| TrackingDetail {
                    message: d.message.clone().unwrap_or_default(),
                    status: d.status.clone(),
                    occurred_at: d.datetime,
                    location: d.tracking_location.as_ref().and_then(TrackingLocation::describe),
                })
                .collect(),
            updated_at: self.updated_at,
        }
    }
}

/// Refund state reported for a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Submitted,
    Refunded,
    Rejected,
    NotApplicable,
    #[serde(other)]
    Unknown,
}

impl RefundStatus {
    /// The carrier accepted the refund request.
    pub fn is_accepted(&self) -> bool {
        matches!(self, RefundStatus::Submitted | RefundStatus::Refunded)
    }
}

/// A pickup to book at the seller's address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRequest {
    pub reference: String,
    pub shipment_id: CarrierShipmentId,
    pub address: Address,
    pub min_datetime: DateTime<Utc>,
    pub max_datetime: DateTime<Utc>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRate {
    pub carrier: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierPickup {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub pickup_rates: Vec<PickupRate>,
}
