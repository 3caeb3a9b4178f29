//! Carrier pickups booked for a shipment.

use chrono::{DateTime, Utc};
use common::{ShipmentId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, StatusChange};
use crate::error::GuardError;

/// Status of a pickup at the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    /// Created but not bought yet.
    #[default]
    Unknown,
    Scheduled,
    Canceled,
}

impl PickupStatus {
    /// Maps the carrier's pickup status.
    pub fn from_carrier_status(status: &str) -> PickupStatus {
        match status {
            "scheduled" => PickupStatus::Scheduled,
            "canceled" | "cancelled" => PickupStatus::Canceled,
            _ => PickupStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickupStatus::Unknown => "unknown",
            PickupStatus::Scheduled => "scheduled",
            PickupStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested pickup time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupWindow {
    min: DateTime<Utc>,
    max: DateTime<Utc>,
}

impl PickupWindow {
    /// Validates that the window is not empty.
    pub fn new(min: DateTime<Utc>, max: DateTime<Utc>) -> Result<Self, GuardError> {
        if min >= max {
            return Err(GuardError::InvalidPickupWindow);
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> DateTime<Utc> {
        self.min
    }

    pub fn max(&self) -> DateTime<Utc> {
        self.max
    }
}

/// A pickup bound to exactly one shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pickup {
    shipment_id: ShipmentId,
    carrier_pickup_id: String,
    reference: String,
    window: PickupWindow,
    instructions: Option<String>,
    status: PickupStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    version: Version,
}

impl Entity for Pickup {
    fn entity_type() -> &'static str {
        "Pickup"
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

impl Pickup {
    pub fn new(
        shipment_id: ShipmentId,
        carrier_pickup_id: impl Into<String>,
        reference: impl Into<String>,
        window: PickupWindow,
        instructions: Option<String>,
        status: PickupStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            shipment_id,
            carrier_pickup_id: carrier_pickup_id.into(),
            reference: reference.into(),
            window,
            instructions,
            status,
            created_at: now,
            version: Version::initial(),
        }
    }

    pub fn shipment_id(&self) -> ShipmentId {
        self.shipment_id
    }

    pub fn carrier_pickup_id(&self) -> &str {
        &self.carrier_pickup_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn window(&self) -> PickupWindow {
        self.window
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn status(&self) -> PickupStatus {
        self.status
    }

    /// A pickup that has not been canceled blocks booking another one.
    pub fn is_active(&self) -> bool {
        self.status != PickupStatus::Canceled
    }

    /// `unknown → scheduled`, once the carrier confirms the purchase.
    pub fn mark_scheduled(&mut self, now: DateTime<Utc>) -> Result<StatusChange, GuardError> {
        if self.status != PickupStatus::Unknown {
            return Err(GuardError::invalid("schedule_pickup", self.status));
        }
        self.status = PickupStatus::Scheduled;
        Ok(StatusChange::new(
            "schedule_pickup",
            PickupStatus::Unknown,
            PickupStatus::Scheduled,
            now,
        ))
    }

    /// `scheduled → canceled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<StatusChange, GuardError> {
        if self.status != PickupStatus::Scheduled {
            return Err(GuardError::invalid("cancel_pickup", self.status));
        }
        self.status = PickupStatus::Canceled;
        Ok(StatusChange::new(
            "cancel_pickup",
            PickupStatus::Scheduled,
            PickupStatus::Canceled,
            now,
        ))
    }
}
