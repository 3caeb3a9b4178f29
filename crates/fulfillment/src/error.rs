//! Fulfillment error types.

use common::LineItemId;
use domain::GuardError;
use fulfillment_store::StoreError;
use thiserror::Error;

use crate::services::CarrierError;

/// Errors that can occur while running fulfillment workflows.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// A state machine guard rejected the transition.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// The caller is not a party allowed to perform the action.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// A business rule outside the state machine rejected the request.
    #[error("{0}")]
    Rejected(String),

    /// Line item not found.
    #[error("Line item not found: {0}")]
    LineItemNotFound(LineItemId),

    /// Carrier gateway error.
    #[error("Carrier error: {0}")]
    Carrier(#[from] CarrierError),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Payment(String),

    /// Notification delivery error.
    #[error("Notification error: {0}")]
    Notification(String),

    /// A carrier event could not be understood.
    #[error("Invalid carrier event: {0}")]
    InvalidEvent(String),

    /// Another process holds the job lease.
    #[error("Lease '{0}' is held by another run")]
    LeaseHeld(&'static str),

    /// Settings that would let a workflow misbehave.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    /// True when a concurrent writer won and the operation may be retried
    /// after reloading.
    pub fn is_conflict(&self) -> bool {
        matches!(self, FulfillmentError::Store(err) if err.is_conflict())
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
