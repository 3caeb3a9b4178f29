//! Line item state machine.

use serde::{Deserialize, Serialize};

use super::commands::{LineItemCommand, TransitionGuards};
use crate::error::GuardError;
use crate::shipment::ShipmentStatus;

/// The fulfillment status of a line item.
///
/// State transitions:
/// ```text
/// Active ──► ReadyToShip ──► LabelPending ──► LabelPrinted ──► InTransit ──► Received
///                 ▲               │
///                 │               ▼
///                 └──────── LabelFailure
///
/// Active, LabelPrinted, InTransit ──► Canceled
/// LabelPrinted, InTransit ──► InReturn
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    /// Paid for, waiting on the seller.
    #[default]
    Active,

    /// Seller confirmed the item can ship.
    ReadyToShip,

    /// Reserved by a batch run, label purchase in flight.
    LabelPending,

    /// Label bought; the seller can ship.
    LabelPrinted,

    /// Label purchase failed; the next batch run retries it.
    LabelFailure,

    /// The carrier reported movement.
    InTransit,

    /// The buyer confirmed delivery (terminal state).
    Received,

    /// Canceled by the seller (terminal state).
    Canceled,

    /// Being returned by the buyer.
    InReturn,
}

impl LineItemStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [LineItemStatus; 9] = [
        LineItemStatus::Active,
        LineItemStatus::ReadyToShip,
        LineItemStatus::LabelPending,
        LineItemStatus::LabelPrinted,
        LineItemStatus::LabelFailure,
        LineItemStatus::InTransit,
        LineItemStatus::Received,
        LineItemStatus::Canceled,
        LineItemStatus::InReturn,
    ];

    /// Returns true if the seller can confirm the item (again, after a
    /// label failure).
    pub fn can_confirm_to_ship(&self) -> bool {
        matches!(self, LineItemStatus::Active | LineItemStatus::LabelFailure)
    }

    /// Returns true if a batch run may reserve the item.
    pub fn can_wait_to_print_label(&self) -> bool {
        matches!(self, LineItemStatus::Active | LineItemStatus::ReadyToShip)
    }

    /// Returns true if a purchased label can be recorded.
    pub fn can_mark_label_printed(&self) -> bool {
        matches!(self, LineItemStatus::LabelPending)
    }

    /// Returns true if a purchased label may be recorded directly, bypassing
    /// `label_pending`.
    pub fn can_print_label(&self) -> bool {
        matches!(
            self,
            LineItemStatus::Active | LineItemStatus::ReadyToShip | LineItemStatus::LabelPending
        )
    }

    /// Returns true if carrier movement can be recorded.
    pub fn can_move_in_transit(&self) -> bool {
        matches!(
            self,
            LineItemStatus::Active
                | LineItemStatus::ReadyToShip
                | LineItemStatus::LabelPending
                | LineItemStatus::LabelPrinted
        )
    }

    /// Returns true if the buyer can confirm receipt.
    pub fn can_receive(&self) -> bool {
        matches!(self, LineItemStatus::InTransit)
    }

    /// Returns true if a label failure can be recorded.
    pub fn can_fail_label(&self) -> bool {
        matches!(
            self,
            LineItemStatus::LabelPending | LineItemStatus::Active | LineItemStatus::ReadyToShip
        )
    }

    /// Returns true if the status itself permits cancellation.
    ///
    /// The shipment guard is checked separately by [`LineItemStatus::transition`].
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            LineItemStatus::Active | LineItemStatus::InTransit | LineItemStatus::LabelPrinted
        )
    }

    /// Returns true if a return can be started.
    pub fn can_start_return(&self) -> bool {
        matches!(self, LineItemStatus::LabelPrinted | LineItemStatus::InTransit)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, LineItemStatus::Received | LineItemStatus::Canceled)
    }

    /// Returns true if a batch run should pick the item up.
    pub fn is_eligible_for_batch(&self) -> bool {
        self.can_wait_to_print_label()
    }

    /// Returns the status name as stored and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemStatus::Active => "active",
            LineItemStatus::ReadyToShip => "ready_to_ship",
            LineItemStatus::LabelPending => "label_pending",
            LineItemStatus::LabelPrinted => "label_printed",
            LineItemStatus::LabelFailure => "label_failure",
            LineItemStatus::InTransit => "in_transit",
            LineItemStatus::Received => "received",
            LineItemStatus::Canceled => "canceled",
            LineItemStatus::InReturn => "in_return",
        }
    }

    /// Computes the status a command leads to, or why it is refused.
    ///
    /// Pure: it only looks at the current status, the command and the guard
    /// facts. Transitions not listed here are rejected, including moves to the
    /// current status.
    pub fn transition(
        self,
        command: &LineItemCommand,
        guards: &TransitionGuards,
    ) -> Result<LineItemStatus, GuardError> {
        let action = command.action();
        let allowed = match command {
            LineItemCommand::ConfirmToShip => self.can_confirm_to_ship(),
            LineItemCommand::WaitToPrintLabel => self.can_wait_to_print_label(),
            LineItemCommand::LabelPrinted => self.can_mark_label_printed(),
            LineItemCommand::PrintLabel => self.can_print_label(),
            LineItemCommand::MoveInTransit => self.can_move_in_transit(),
            LineItemCommand::Receive => self.can_receive(),
            LineItemCommand::FailedToPrintLabel { .. } => self.can_fail_label(),
            LineItemCommand::Cancel { .. } => self.can_cancel(),
            LineItemCommand::StartReturn => self.can_start_return(),
        };
        if !allowed {
            return Err(GuardError::invalid(action, self));
        }

        match command {
            LineItemCommand::ConfirmToShip => Ok(LineItemStatus::ReadyToShip),
            LineItemCommand::WaitToPrintLabel => Ok(LineItemStatus::LabelPending),
            LineItemCommand::LabelPrinted => match guards.shipment {
                None => Err(GuardError::ShipmentMissing { action }),
                Some(shipment) if !shipment.has_label => Err(GuardError::LabelMissing),
                Some(_) => Ok(LineItemStatus::LabelPrinted),
            },
            LineItemCommand::PrintLabel => Ok(LineItemStatus::LabelPrinted),
            LineItemCommand::MoveInTransit => Ok(LineItemStatus::InTransit),
            LineItemCommand::Receive => Ok(LineItemStatus::Received),
            LineItemCommand::FailedToPrintLabel { .. } => Ok(LineItemStatus::LabelFailure),
            LineItemCommand::Cancel { .. } => {
                match guards.shipment {
                    Some(shipment) if !shipment.status.allows_line_item_cancellation() => {
                        Err(GuardError::ShipmentInProgress {
                            shipment_status: shipment.status.to_string(),
                        })
                    }
                    _ => Ok(LineItemStatus::Canceled),
                }
            }
            LineItemCommand::StartReturn => Ok(LineItemStatus::InReturn),
        }
    }

    /// Whether a line item whose shipment is in `shipment_status` may be
    /// canceled. No shipment means nothing has been bought yet.
    pub fn cancellation_allowed_with(shipment_status: Option<ShipmentStatus>) -> bool {
        shipment_status.is_none_or(|s| s.allows_line_item_cancellation())
    }
}

impl std::fmt::Display for LineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LineItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LineItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown line item status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_item::commands::ShipmentFacts;

    fn no_shipment() -> TransitionGuards {
        TransitionGuards::default()
    }

    fn with_shipment(status: ShipmentStatus) -> TransitionGuards {
        TransitionGuards::with_shipment(ShipmentFacts {
            status,
            has_label: true,
        })
    }

    #[test]
    fn test_default_status_is_active() {
        assert_eq!(LineItemStatus::default(), LineItemStatus::Active);
    }

    #[test]
    fn test_happy_path_sequence() {
        let mut status = LineItemStatus::Active;
        let label_guards = with_shipment(ShipmentStatus::LabelGenerated);
        for command in [
            LineItemCommand::ConfirmToShip,
            LineItemCommand::WaitToPrintLabel,
            LineItemCommand::LabelPrinted,
            LineItemCommand::MoveInTransit,
            LineItemCommand::Receive,
        ] {
            status = status.transition(&command, &label_guards).unwrap();
        }
        assert_eq!(status, LineItemStatus::Received);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_label_printed_requires_shipment_with_label() {
        let err = LineItemStatus::LabelPending
            .transition(&LineItemCommand::LabelPrinted, &no_shipment())
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::ShipmentMissing {
                action: "label_printed"
            }
        );

        let unlabeled = TransitionGuards::with_shipment(ShipmentFacts {
            status: ShipmentStatus::LabelGenerated,
            has_label: false,
        });
        let err = LineItemStatus::LabelPending
            .transition(&LineItemCommand::LabelPrinted, &unlabeled)
            .unwrap_err();
        assert_eq!(err, GuardError::LabelMissing);
    }

    #[test]
    fn test_label_printed_only_from_label_pending() {
        let guards = with_shipment(ShipmentStatus::LabelGenerated);
        for status in LineItemStatus::ALL {
            let result = status.transition(&LineItemCommand::LabelPrinted, &guards);
            assert_eq!(result.is_ok(), status == LineItemStatus::LabelPending, "{status}");
        }
    }

    #[test]
    fn test_print_label_bypasses_label_pending() {
        for status in [
            LineItemStatus::Active,
            LineItemStatus::ReadyToShip,
            LineItemStatus::LabelPending,
        ] {
            let next = status
                .transition(&LineItemCommand::PrintLabel, &no_shipment())
                .unwrap();
            assert_eq!(next, LineItemStatus::LabelPrinted);
        }
        assert!(
            LineItemStatus::LabelPrinted
                .transition(&LineItemCommand::PrintLabel, &no_shipment())
                .is_err()
        );
    }

    #[test]
    fn test_confirm_to_ship_recovers_from_label_failure() {
        let next = LineItemStatus::LabelFailure
            .transition(&LineItemCommand::ConfirmToShip, &no_shipment())
            .unwrap();
        assert_eq!(next, LineItemStatus::ReadyToShip);
        assert!(next.is_eligible_for_batch());
    }

    #[test]
    fn test_confirm_to_ship_is_not_a_self_loop() {
        let err = LineItemStatus::ReadyToShip
            .transition(&LineItemCommand::ConfirmToShip, &no_shipment())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot confirm_to_ship in the current state (ready_to_ship)"
        );
    }

    #[test]
    fn test_failed_to_print_label_sources() {
        let command = LineItemCommand::FailedToPrintLabel {
            reason: "Shipment failed to purchase label".into(),
        };
        for status in LineItemStatus::ALL {
            let expected = matches!(
                status,
                LineItemStatus::LabelPending | LineItemStatus::Active | LineItemStatus::ReadyToShip
            );
            assert_eq!(
                status.transition(&command, &no_shipment()).is_ok(),
                expected,
                "{status}"
            );
        }
    }

    #[test]
    fn test_cancel_blocked_by_moving_shipment() {
        let err = LineItemStatus::InTransit
            .transition(
                &LineItemCommand::Cancel {
                    reason: "changed mind".into(),
                },
                &with_shipment(ShipmentStatus::InTransit),
            )
            .unwrap_err();
        assert!(matches!(err, GuardError::ShipmentInProgress { .. }));
    }

    #[test]
    fn test_cancel_allowed_with_unshipped_label() {
        for shipment in [
            ShipmentStatus::Created,
            ShipmentStatus::Error,
            ShipmentStatus::LabelGenerated,
            ShipmentStatus::LabelPending,
        ] {
            let next = LineItemStatus::LabelPrinted
                .transition(
                    &LineItemCommand::Cancel {
                        reason: "out of stock".into(),
                    },
                    &with_shipment(shipment),
                )
                .unwrap();
            assert_eq!(next, LineItemStatus::Canceled);
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let guards = with_shipment(ShipmentStatus::LabelGenerated);
        let commands = [
            LineItemCommand::ConfirmToShip,
            LineItemCommand::WaitToPrintLabel,
            LineItemCommand::LabelPrinted,
            LineItemCommand::PrintLabel,
            LineItemCommand::MoveInTransit,
            LineItemCommand::Receive,
            LineItemCommand::FailedToPrintLabel { reason: "x".into() },
            LineItemCommand::Cancel { reason: "x".into() },
            LineItemCommand::StartReturn,
        ];
        for status in [LineItemStatus::Received, LineItemStatus::Canceled] {
            for command in &commands {
                assert!(status.transition(command, &guards).is_err());
            }
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in LineItemStatus::ALL {
            assert_eq!(status.as_str().parse::<LineItemStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<LineItemStatus>().is_err());
    }
}
