use common::{LineItemId, Version};
use domain::CarrierShipmentId;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the fulfillment store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed since it was loaded.
    #[error(
        "Concurrency conflict for {entity_type} {entity_id}: expected version {expected}"
    )]
    ConcurrencyConflict {
        entity_type: &'static str,
        entity_id: Uuid,
        expected: Version,
    },

    /// Another shipment already mirrors this carrier shipment.
    #[error("Shipment already recorded for carrier shipment {0}")]
    DuplicateCarrierShipment(CarrierShipmentId),

    /// The line item already owns a shipment.
    #[error("Line item {0} already has a shipment")]
    DuplicateShipmentForLineItem(LineItemId),

    /// The record does not exist.
    #[error("{entity_type} not found: {entity_id}")]
    NotFound {
        entity_type: &'static str,
        entity_id: Uuid,
    },

    /// Stored data could not be decoded.
    #[error("Corrupt {entity_type} record: {message}")]
    Corrupt {
        entity_type: &'static str,
        message: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when a concurrent writer won; reloading and retrying may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. }
                | StoreError::DuplicateCarrierShipment(_)
                | StoreError::DuplicateShipmentForLineItem(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
