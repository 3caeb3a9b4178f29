use chrono::{DateTime, Utc};
use domain::{Entity, StatusChange};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One committed status change, kept for debugging and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub from_status: String,
    pub to_status: String,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Records a change made to `entity`.
    pub fn for_entity<E: Entity>(entity: &E, change: StatusChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: E::entity_type().to_string(),
            entity_id: entity.entity_id(),
            action: change.action,
            from_status: change.from,
            to_status: change.to,
            reason: change.reason,
            recorded_at: change.at,
        }
    }
}
