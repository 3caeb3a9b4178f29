//! Inbound carrier webhook events.

use serde::Deserialize;
use serde_json::Value;

use super::CarrierError;
use super::types::{CarrierBatch, CarrierTracker};

/// A decoded carrier notification.
#[derive(Debug, Clone, PartialEq)]
pub enum CarrierEvent {
    /// `tracker.created` or `tracker.updated`.
    Tracker(CarrierTracker),
    /// `batch.updated`, with the state the batch was in before.
    BatchUpdated {
        batch: CarrierBatch,
        previous_state: Option<String>,
    },
    /// Anything else; acknowledged and ignored.
    Other { description: String },
}

impl CarrierEvent {
    pub fn kind(&self) -> &str {
        match self {
            CarrierEvent::Tracker(_) => "tracker",
            CarrierEvent::BatchUpdated { .. } => "batch.updated",
            CarrierEvent::Other { description } => description,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    description: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    previous_attributes: Option<PreviousAttributes>,
}

#[derive(Deserialize)]
struct PreviousAttributes {
    #[serde(default)]
    state: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CarrierError> {
    serde_json::from_value(value).map_err(|e| CarrierError::Decode(e.to_string()))
}

/// Parses a webhook body.
pub fn parse_event(payload: &[u8]) -> Result<CarrierEvent, CarrierError> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| CarrierError::Decode(e.to_string()))?;

    match envelope.description.as_str() {
        "tracker.created" | "tracker.updated" => Ok(CarrierEvent::Tracker(decode(envelope.result)?)),
        "batch.updated" => Ok(CarrierEvent::BatchUpdated {
            batch: decode(envelope.result)?,
            previous_state: envelope.previous_attributes.and_then(|p| p.state),
        }),
        _ => Ok(CarrierEvent::Other {
            description: envelope.description,
        }),
    }
}
