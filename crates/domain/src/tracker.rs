//! Carrier tracking state for a shipment.

use chrono::{DateTime, Utc};
use common::{ShipmentId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;
use crate::shipment::ShipmentStatus;

/// One scan event reported by the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingDetail {
    pub message: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Tracker state as reported by the carrier at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerUpdate {
    pub carrier_tracker_id: String,
    pub tracking_code: Option<String>,
    pub public_url: Option<String>,
    pub status: String,
    pub signed_by: Option<String>,
    pub est_delivery_at: Option<DateTime<Utc>>,
    pub details: Vec<TrackingDetail>,
    /// Carrier-side modification time, used to order updates.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of folding a carrier update into the stored tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMerge {
    Created,
    Updated,
    /// Not newer than what is stored; nothing changed.
    Stale,
}

impl TrackerMerge {
    /// Returns true if the tracker must be written.
    pub fn is_change(&self) -> bool {
        !matches!(self, TrackerMerge::Stale)
    }
}

/// The tracker of one shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentTracker {
    shipment_id: ShipmentId,
    carrier_tracker_id: String,
    tracking_code: Option<String>,
    public_url: Option<String>,
    status: String,
    signed_by: Option<String>,
    est_delivery_at: Option<DateTime<Utc>>,
    details: Vec<TrackingDetail>,
    updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    version: Version,
}

impl Entity for ShipmentTracker {
    fn entity_type() -> &'static str {
        "ShipmentTracker"
    }

    fn entity_id(&self) -> Uuid {
        self.shipment_id.as_uuid()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl ShipmentTracker {
    /// Creates the tracker from its first carrier update.
    pub fn from_update(shipment_id: ShipmentId, update: TrackerUpdate, now: DateTime<Utc>) -> Self {
        Self {
            shipment_id,
            carrier_tracker_id: update.carrier_tracker_id,
            tracking_code: update.tracking_code,
            public_url: update.public_url,
            status: update.status,
            signed_by: update.signed_by,
            est_delivery_at: update.est_delivery_at,
            details: update.details,
            updated_at: update.updated_at,
            created_at: now,
            version: Version::initial(),
        }
    }

    /// Merges an existing tracker (if any) with an update.
    pub fn upsert(
        existing: Option<ShipmentTracker>,
        shipment_id: ShipmentId,
        update: TrackerUpdate,
        now: DateTime<Utc>,
    ) -> (ShipmentTracker, TrackerMerge) {
        match existing {
            Some(mut tracker) => {
                let outcome = tracker.merge(update);
                (tracker, outcome)
            }
            None => (
                ShipmentTracker::from_update(shipment_id, update, now),
                TrackerMerge::Created,
            ),
        }
    }

    /// Applies an update only if it is strictly newer than the stored one.
    ///
    /// Redelivered or out-of-order events carry an `updated_at` that is not
    /// newer and are dropped.
    pub fn merge(&mut self, update: TrackerUpdate) -> TrackerMerge {
        if update.updated_at <= self.updated_at {
            return TrackerMerge::Stale;
        }
        self.carrier_tracker_id = update.carrier_tracker_id;
        self.tracking_code = update.tracking_code.or(self.tracking_code.take());
        self.public_url = update.public_url.or(self.public_url.take());
        self.status = update.status;
        self.signed_by = update.signed_by.or(self.signed_by.take());
        self.est_delivery_at = update.est_delivery_at.or(self.est_delivery_at);
        self.details = update.details;
        self.updated_at = update.updated_at;
        TrackerMerge::Updated
    }

    pub fn shipment_id(&self) -> ShipmentId {
        self.shipment_id
    }

    pub fn carrier_tracker_id(&self) -> &str {
        &self.carrier_tracker_id
    }

    pub fn tracking_code(&self) -> Option<&str> {
        self.tracking_code.as_deref()
    }

    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn signed_by(&self) -> Option<&str> {
        self.signed_by.as_deref()
    }

    pub fn est_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.est_delivery_at
    }

    pub fn details(&self) -> &[TrackingDetail] {
        &self.details
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The shipment status the carrier status implies.
    pub fn shipment_status(&self) -> Option<ShipmentStatus> {
        ShipmentStatus::from_carrier_status(&self.status)
    }

    pub fn is_delivered(&self) -> bool {
        self.shipment_status() == Some(ShipmentStatus::Received)
    }

    /// True once the carrier has physically moved the parcel.
    pub fn shows_movement(&self) -> bool {
        matches!(
            self.shipment_status(),
            Some(ShipmentStatus::InTransit | ShipmentStatus::Received)
        )
    }
}
