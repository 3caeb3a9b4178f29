//! Traits and types shared by every persisted entity.

use chrono::{DateTime, Utc};
use common::Version;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// A record the store persists with optimistic concurrency.
///
/// The version carried by an entity is the version it was loaded at. The
/// store rejects a write whose version no longer matches what is stored,
/// then hands back the entity with its version bumped.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Entity type name used in the transition history.
    fn entity_type() -> &'static str;

    /// The key the entity is stored under.
    fn entity_id(&self) -> Uuid;

    /// Version the entity was loaded at (0 if never stored).
    fn version(&self) -> Version;

    /// Sets the version after a successful write.
    fn set_version(&mut self, version: Version);
}

/// A status change produced by a successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// The transition name (e.g. `print_label`).
    pub action: String,
    pub from: String,
    pub to: String,
    /// Failure or cancellation reason, when the transition carries one.
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    /// Creates a status change record.
    pub fn new(
        action: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.into(),
            from: from.to_string(),
            to: to.to_string(),
            reason: None,
            at,
        }
    }

    /// Attaches a reason to the change.
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}
