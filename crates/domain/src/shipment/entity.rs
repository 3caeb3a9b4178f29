//! The shipment entity and refund policy.

use chrono::{DateTime, Duration, Utc};
use common::{LineItemId, ShipmentId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ShipmentStatus;
use crate::entity::{Entity, StatusChange};
use crate::line_item::ShipmentFacts;
use crate::value_objects::CarrierShipmentId;

/// When a bought label may be refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// Time that must pass after the label was generated.
    pub grace_period: Duration,
    /// Skips the waiting period (sandbox carrier accounts).
    pub test_mode: bool,
}

impl RefundPolicy {
    pub const DEFAULT_GRACE_DAYS: i64 = 15;

    pub fn new(grace_days: i64, test_mode: bool) -> Self {
        Self {
            grace_period: Duration::days(grace_days),
            test_mode,
        }
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GRACE_DAYS, false)
    }
}

/// A carrier shipment mirrored locally.
///
/// Keyed by the carrier shipment id. The back-reference to the line item is
/// optional because a webhook can name a shipment before the line item it
/// belongs to is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    id: ShipmentId,
    carrier_shipment_id: CarrierShipmentId,
    line_item_id: Option<LineItemId>,
    /// Reference string the shipment was created with.
    reference: Option<String>,
    carrier_rate_id: Option<String>,
    label_url: Option<String>,
    tracking_code: Option<String>,
    status: ShipmentStatus,
    status_changed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    version: Version,
}

impl Entity for Shipment {
    fn entity_type() -> &'static str {
        "Shipment"
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

impl Shipment {
    /// Creates a local record for a carrier shipment.
    pub fn new(
        carrier_shipment_id: CarrierShipmentId,
        line_item_id: Option<LineItemId>,
        status: ShipmentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ShipmentId::new(),
            carrier_shipment_id,
            line_item_id,
            reference: None,
            carrier_rate_id: None,
            label_url: None,
            tracking_code: None,
            status,
            status_changed_at: now,
            created_at: now,
            version: Version::initial(),
        }
    }

    pub fn id(&self) -> ShipmentId {
        self.id
    }

    pub fn carrier_shipment_id(&self) -> &CarrierShipmentId {
        &self.carrier_shipment_id
    }

    pub fn line_item_id(&self) -> Option<LineItemId> {
        self.line_item_id
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn carrier_rate_id(&self) -> Option<&str> {
        self.carrier_rate_id.as_deref()
    }

    pub fn label_url(&self) -> Option<&str> {
        self.label_url.as_deref()
    }

    pub fn tracking_code(&self) -> Option<&str> {
        self.tracking_code.as_deref()
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Guard facts for the owning line item's state machine.
    pub fn facts(&self) -> ShipmentFacts {
        ShipmentFacts {
            status: self.status,
            has_label: self.label_url.is_some(),
        }
    }

    /// Attaches the owning line item if none is known yet.
    ///
    /// Returns true if the shipment changed.
    pub fn attach_line_item(&mut self, line_item_id: LineItemId) -> bool {
        if self.line_item_id.is_some() {
            return false;
        }
        self.line_item_id = Some(line_item_id);
        true
    }

    /// Releases the owning line item, e.g. when a newer label replaced this
    /// one.
    pub fn detach_line_item(&mut self) -> Option<LineItemId> {
        self.line_item_id.take()
    }

    /// Copies mutable carrier fields; last writer wins. Returns true if
    /// anything changed.
    pub fn update_carrier_fields(
        &mut self,
        reference: Option<&str>,
        rate_id: Option<&str>,
        label_url: Option<&str>,
        tracking_code: Option<&str>,
    ) -> bool {
        let mut changed = false;
        for (field, value) in [
            (&mut self.reference, reference),
            (&mut self.carrier_rate_id, rate_id),
            (&mut self.label_url, label_url),
            (&mut self.tracking_code, tracking_code),
        ] {
            if let Some(value) = value {
                if field.as_deref() != Some(value) {
                    *field = Some(value.to_string());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Moves the shipment forward. Backward moves and no-ops return `None`
    /// and leave the shipment untouched, so stale carrier data cannot
    /// regress it.
    pub fn advance(&mut self, next: ShipmentStatus, now: DateTime<Utc>) -> Option<StatusChange> {
        if !self.status.can_advance_to(next) {
            return None;
        }
        let change = StatusChange::new("advance", self.status, next, now);
        self.status = next;
        self.status_changed_at = now;
        Some(change)
    }

    /// Whether the label can still be refunded at the carrier.
    ///
    /// Requires `label_generated` and, outside test mode, that the grace
    /// period since the status changed has been exceeded.
    pub fn can_refund(&self, now: DateTime<Utc>, policy: &RefundPolicy) -> bool {
        if self.status != ShipmentStatus::LabelGenerated {
            return false;
        }
        policy.test_mode || now - self.status_changed_at > policy.grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipment(status: ShipmentStatus, at: DateTime<Utc>) -> Shipment {
        Shipment::new(CarrierShipmentId::new("shp_1"), Some(LineItemId::new()), status, at)
    }

    #[test]
    fn test_can_refund_after_grace_period() {
        let generated = Utc::now() - Duration::days(16);
        let s = shipment(ShipmentStatus::LabelGenerated, generated);
        assert!(s.can_refund(Utc::now(), &RefundPolicy::default()));
    }

    #[test]
    fn test_cannot_refund_within_grace_period() {
        let generated = Utc::now() - Duration::days(3);
        let s = shipment(ShipmentStatus::LabelGenerated, generated);
        assert!(!s.can_refund(Utc::now(), &RefundPolicy::default()));
        assert!(s.can_refund(Utc::now(), &RefundPolicy::new(15, true)));
    }

    #[test]
    fn test_grace_boundary_is_exclusive() {
        let now = Utc::now();
        let s = shipment(ShipmentStatus::LabelGenerated, now - Duration::days(15));
        assert!(!s.can_refund(now, &RefundPolicy::default()));
    }

    #[test]
    fn test_cannot_refund_outside_label_generated() {
        let long_ago = Utc::now() - Duration::days(60);
        for status in [ShipmentStatus::InTransit, ShipmentStatus::Created, ShipmentStatus::Error] {
            let s = shipment(status, long_ago);
            assert!(!s.can_refund(Utc::now(), &RefundPolicy::new(15, true)));
        }
    }

    #[test]
    fn test_advance_ignores_backward_moves() {
        let now = Utc::now();
        let mut s = shipment(ShipmentStatus::InTransit, now);
        assert!(s.advance(ShipmentStatus::LabelGenerated, now).is_none());
        assert_eq!(s.status(), ShipmentStatus::InTransit);

        let later = now + Duration::hours(1);
        let change = s.advance(ShipmentStatus::Received, later).unwrap();
        assert_eq!(change.from, "in_transit");
        assert_eq!(s.status_changed_at(), later);
    }

    #[test]
    fn test_attach_line_item_only_once() {
        let mut s = Shipment::new(
            CarrierShipmentId::new("shp_orphan"),
            None,
            ShipmentStatus::LabelGenerated,
            Utc::now(),
        );
        let first = LineItemId::new();
        assert!(s.attach_line_item(first));
        assert!(!s.attach_line_item(LineItemId::new()));
        assert_eq!(s.line_item_id(), Some(first));

        assert_eq!(s.detach_line_item(), Some(first));
        assert!(s.attach_line_item(LineItemId::new()));
    }

    #[test]
    fn test_update_carrier_fields_reports_changes() {
        let mut s = shipment(ShipmentStatus::LabelGenerated, Utc::now());
        assert!(s.update_carrier_fields(None, Some("rate_1"), Some("https://l/1.png"), None));
        assert!(!s.update_carrier_fields(None, Some("rate_1"), Some("https://l/1.png"), None));
        assert!(s.facts().has_label);
    }
}
