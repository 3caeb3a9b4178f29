//! Cancellation side effects that still have to happen.

use chrono::{DateTime, Utc};
use common::{LineItemId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;

/// A side effect of canceling a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStep {
    CancelPickup,
    CarrierRefund,
    PaymentRefund,
    NotifyBuyer,
}

impl CompensationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationStep::CancelPickup => "cancel_pickup",
            CompensationStep::CarrierRefund => "carrier_refund",
            CompensationStep::PaymentRefund => "payment_refund",
            CompensationStep::NotifyBuyer => "notify_buyer",
        }
    }
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed side effect queued for another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationTask {
    id: Uuid,
    line_item_id: LineItemId,
    step: CompensationStep,
    /// The cancellation reason, needed to re-send the buyer notification.
    cancel_reason: String,
    attempts: u32,
    last_error: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: Version,
}

impl Entity for CompensationTask {
    fn entity_type() -> &'static str {
        "CompensationTask"
    }

    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl CompensationTask {
    /// Records the first failed attempt of a step.
    pub fn new(
        line_item_id: LineItemId,
        step: CompensationStep,
        cancel_reason: impl Into<String>,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            line_item_id,
            step,
            cancel_reason: cancel_reason.into(),
            attempts: 1,
            last_error: error.into(),
            created_at: now,
            resolved_at: None,
            version: Version::initial(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn line_item_id(&self) -> LineItemId {
        self.line_item_id
    }

    pub fn step(&self) -> CompensationStep {
        self.step
    }

    pub fn cancel_reason(&self) -> &str {
        &self.cancel_reason
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn is_pending(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = error.into();
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.resolved_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_are_counted_until_resolved() {
        let now = Utc::now();
        let mut task = CompensationTask::new(
            LineItemId::new(),
            CompensationStep::PaymentRefund,
            "out of stock",
            "gateway timeout",
            now,
        );
        assert!(task.is_pending());
        task.record_failure("gateway timeout again");
        assert_eq!(task.attempts(), 2);
        task.resolve(now);
        assert_eq!(task.attempts(), 3);
        assert!(!task.is_pending());
    }
}
