//! Shipment state machine.

use serde::{Deserialize, Serialize};

/// Local status of a carrier shipment.
///
/// State transitions:
/// ```text
/// Created ──► LabelPending ──► LabelGenerated ──► InTransit ──► Received
///    └────────────┴─────────────────┴─────────────────┴──► Error
/// ```
/// Moves only go forward. `Error` can be entered from any state except
/// `Received`, and left again if the carrier later reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    #[default]
    Created,
    LabelPending,
    LabelGenerated,
    InTransit,
    Received,
    Error,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 6] = [
        ShipmentStatus::Created,
        ShipmentStatus::LabelPending,
        ShipmentStatus::LabelGenerated,
        ShipmentStatus::InTransit,
        ShipmentStatus::Received,
        ShipmentStatus::Error,
    ];

    /// Maps the carrier's shipment/tracker status vocabulary.
    pub fn from_carrier_status(status: &str) -> Option<ShipmentStatus> {
        match status {
            "delivered" => Some(ShipmentStatus::Received),
            "in_transit" | "out_for_delivery" | "available_for_pickup" => {
                Some(ShipmentStatus::InTransit)
            }
            "pre_transit" | "unknown" => Some(ShipmentStatus::LabelGenerated),
            "failure" | "error" | "return_to_sender" | "cancelled" => Some(ShipmentStatus::Error),
            _ => None,
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            ShipmentStatus::Created => Some(0),
            ShipmentStatus::LabelPending => Some(1),
            ShipmentStatus::LabelGenerated => Some(2),
            ShipmentStatus::InTransit => Some(3),
            ShipmentStatus::Received => Some(4),
            ShipmentStatus::Error => None,
        }
    }

    /// Returns true if moving to `next` is a forward move.
    pub fn can_advance_to(&self, next: ShipmentStatus) -> bool {
        match (self.rank(), next.rank()) {
            (_, None) => *self != ShipmentStatus::Error && *self != ShipmentStatus::Received,
            (None, Some(_)) => true,
            (Some(current), Some(target)) => target > current,
        }
    }

    /// Returns true if a line item whose shipment is here may still be canceled.
    pub fn allows_line_item_cancellation(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Created
                | ShipmentStatus::Error
                | ShipmentStatus::LabelGenerated
                | ShipmentStatus::LabelPending
        )
    }

    /// Returns true if the reconciliation job should still poll the carrier.
    pub fn needs_polling(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::LabelPending | ShipmentStatus::LabelGenerated | ShipmentStatus::InTransit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Created => "created",
            ShipmentStatus::LabelPending => "label_pending",
            ShipmentStatus::LabelGenerated => "label_generated",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Received => "received",
            ShipmentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShipmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown shipment status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_vocabulary() {
        assert_eq!(
            ShipmentStatus::from_carrier_status("delivered"),
            Some(ShipmentStatus::Received)
        );
        assert_eq!(
            ShipmentStatus::from_carrier_status("out_for_delivery"),
            Some(ShipmentStatus::InTransit)
        );
        assert_eq!(
            ShipmentStatus::from_carrier_status("pre_transit"),
            Some(ShipmentStatus::LabelGenerated)
        );
        assert_eq!(
            ShipmentStatus::from_carrier_status("return_to_sender"),
            Some(ShipmentStatus::Error)
        );
        assert_eq!(ShipmentStatus::from_carrier_status("teleported"), None);
    }

    #[test]
    fn test_only_forward_moves() {
        assert!(ShipmentStatus::Created.can_advance_to(ShipmentStatus::LabelGenerated));
        assert!(ShipmentStatus::LabelGenerated.can_advance_to(ShipmentStatus::InTransit));
        assert!(!ShipmentStatus::InTransit.can_advance_to(ShipmentStatus::LabelGenerated));
        assert!(!ShipmentStatus::InTransit.can_advance_to(ShipmentStatus::InTransit));
    }

    #[test]
    fn test_error_transitions() {
        assert!(ShipmentStatus::InTransit.can_advance_to(ShipmentStatus::Error));
        assert!(!ShipmentStatus::Received.can_advance_to(ShipmentStatus::Error));
        assert!(!ShipmentStatus::Error.can_advance_to(ShipmentStatus::Error));
        assert!(ShipmentStatus::Error.can_advance_to(ShipmentStatus::InTransit));
    }

    #[test]
    fn test_cancellation_window() {
        assert!(ShipmentStatus::LabelGenerated.allows_line_item_cancellation());
        assert!(!ShipmentStatus::InTransit.allows_line_item_cancellation());
        assert!(!ShipmentStatus::Received.allows_line_item_cancellation());
    }
}
