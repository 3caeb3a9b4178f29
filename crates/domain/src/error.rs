//! Domain error types.

use thiserror::Error;

/// A state machine refused a transition.
///
/// Guard errors are business errors: the caller asked for something the
/// current state does not allow. They never indicate a broken system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The action is not allowed from the current status.
    #[error("cannot {action} in the current state ({current})")]
    InvalidTransition {
        action: &'static str,
        current: String,
    },

    /// The action requires a shipment and none exists.
    #[error("cannot {action}: no shipment exists for this line item")]
    ShipmentMissing { action: &'static str },

    /// The shipment exists but its label has not been resolved.
    #[error("cannot label_printed: the shipment has no label")]
    LabelMissing,

    /// The shipment is too far along for the line item to be canceled.
    #[error("cannot cancel: shipment is already {shipment_status}")]
    ShipmentInProgress { shipment_status: String },

    /// A pickup window must start before it ends.
    #[error("pickup window must start before it ends")]
    InvalidPickupWindow,
}

impl GuardError {
    /// Builds an invalid-transition error from any displayable status.
    pub fn invalid(action: &'static str, current: impl std::fmt::Display) -> Self {
        GuardError::InvalidTransition {
            action,
            current: current.to_string(),
        }
    }
}
