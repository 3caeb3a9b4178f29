//! Commands accepted by the line item state machine.

use serde::{Deserialize, Serialize};

use crate::shipment::ShipmentStatus;

/// A requested line item transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LineItemCommand {
    ConfirmToShip,
    WaitToPrintLabel,
    LabelPrinted,
    /// Direct label purchase that skips `label_pending`.
    PrintLabel,
    MoveInTransit,
    Receive,
    FailedToPrintLabel { reason: String },
    Cancel { reason: String },
    StartReturn,
}

impl LineItemCommand {
    /// The transition name used in errors and the transition history.
    pub fn action(&self) -> &'static str {
        match self {
            LineItemCommand::ConfirmToShip => "confirm_to_ship",
            LineItemCommand::WaitToPrintLabel => "wait_to_print_label",
            LineItemCommand::LabelPrinted => "label_printed",
            LineItemCommand::PrintLabel => "print_label",
            LineItemCommand::MoveInTransit => "intransition",
            LineItemCommand::Receive => "receive",
            LineItemCommand::FailedToPrintLabel { .. } => "failed_to_print_label",
            LineItemCommand::Cancel { .. } => "cancel",
            LineItemCommand::StartReturn => "start_return",
        }
    }

    /// True when the guard depends on the shipment's state, so a commit of
    /// the transition must not race a shipment change.
    pub fn reads_shipment(&self) -> bool {
        matches!(
            self,
            LineItemCommand::LabelPrinted | LineItemCommand::Cancel { .. }
        )
    }

    /// Reason carried by the command, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            LineItemCommand::FailedToPrintLabel { reason } | LineItemCommand::Cancel { reason } => {
                Some(reason)
            }
            _ => None,
        }
    }
}

/// What the state machine needs to know about the item's shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipmentFacts {
    pub status: ShipmentStatus,
    pub has_label: bool,
}

/// Facts outside the line item that guards depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionGuards {
    /// The shipment bought for the item, if one exists.
    pub shipment: Option<ShipmentFacts>,
}

impl TransitionGuards {
    /// Guards for an item with a shipment.
    pub fn with_shipment(shipment: ShipmentFacts) -> Self {
        Self {
            shipment: Some(shipment),
        }
    }
}
