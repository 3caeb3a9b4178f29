//! Carrier webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use fulfillment::{CarrierGateway, EventOutcome, FulfillmentError, Notifier, PaymentGateway};
use fulfillment_store::FulfillmentStore;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::ApiError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-hmac-signature";
const SIGNATURE_PREFIX: &str = "hmac-sha256-hex=";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Signs `body` the way the carrier does, for the signature header.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Checks the signature header against the raw body in constant time.
pub fn verify_signature(secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    let Some(hex_digest) = header.and_then(|h| h.trim().strip_prefix(SIGNATURE_PREFIX)) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// POST /webhooks/carrier: applies a carrier event.
///
/// Answers 200 once the body is authentic and decodable, even if applying
/// it failed; polling repairs what a lost event leaves behind.
#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn carrier<S, C, P, N>(
    State(state): State<Arc<AppState<S, C, P, N>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    if let Some(secret) = state.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if !verify_signature(secret, header, &body) {
            tracing::warn!("Rejected carrier webhook with a missing or invalid signature");
            metrics::counter!("api_webhook_signature_rejections_total").increment(1);
            return Err(ApiError::Unauthorized("Invalid webhook signature".to_string()));
        }
    }

    let response = match state.reconciler.handle_payload(&body).await {
        Ok(EventOutcome::Applied { changed }) => WebhookResponse {
            status: "applied",
            detail: Some(format!("{changed} changed")),
        },
        Ok(EventOutcome::Ignored(reason)) => WebhookResponse {
            status: "ignored",
            detail: Some(reason.to_string()),
        },
        Err(err @ FulfillmentError::InvalidEvent(_)) => return Err(err.into()),
        Err(err) => {
            tracing::error!(error = %err, "Carrier webhook processing failed");
            WebhookResponse {
                status: "failed",
                detail: None,
            }
        }
    };
    Ok(Json(response))
}
