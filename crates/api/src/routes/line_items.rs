//! Seller and buyer operations on line items.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::LineItemId;
use domain::{LineItem, Pickup};
use fulfillment::{
    CancellationReport, CarrierGateway, Notifier, PaymentGateway, ReceiptCheck, StepOutcome,
};
use fulfillment_store::{FulfillmentStore, TransitionRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::extract::Caller;
use crate::state::AppState;

type AppStateRef<S, C, P, N> = State<Arc<AppState<S, C, P, N>>>;

// -- Request types --

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct PickupRequest {
    pub min_datetime: DateTime<Utc>,
    pub max_datetime: DateTime<Utc>,
    #[serde(default)]
    pub instructions: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub order_id: String,
    pub listing_id: String,
    pub status: String,
    pub status_changed_at: String,
    pub failure_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub carrier_batch_id: Option<String>,
    pub carrier_shipment_id: Option<String>,
}

impl From<&LineItem> for LineItemResponse {
    fn from(item: &LineItem) -> Self {
        Self {
            id: item.id().to_string(),
            order_id: item.order_id().to_string(),
            listing_id: item.listing_id().to_string(),
            status: item.status().to_string(),
            status_changed_at: item.status_changed_at().to_rfc3339(),
            failure_reason: item.failure_reason().map(String::from),
            cancel_reason: item.cancel_reason().map(String::from),
            carrier_batch_id: item.carrier_batch_id().map(String::from),
            carrier_shipment_id: item.carrier_shipment_id().map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub step: String,
    pub outcome: &'static str,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub line_item: LineItemResponse,
    pub steps: Vec<StepResponse>,
    /// False when a side effect was queued for retry.
    pub complete: bool,
}

impl From<&CancellationReport> for CancelResponse {
    fn from(report: &CancellationReport) -> Self {
        let steps = report
            .steps
            .iter()
            .map(|(step, outcome)| {
                let (outcome, detail) = match outcome {
                    StepOutcome::Completed => ("completed", None),
                    StepOutcome::Skipped(reason) => ("skipped", Some(reason.clone())),
                    StepOutcome::Failed(error) => ("queued", Some(error.clone())),
                };
                StepResponse {
                    step: step.to_string(),
                    outcome,
                    detail,
                }
            })
            .collect();
        Self {
            line_item: LineItemResponse::from(&report.line_item),
            steps,
            complete: report.is_complete(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PickupResponse {
    pub carrier_pickup_id: String,
    pub status: String,
    pub min_datetime: String,
    pub max_datetime: String,
    pub instructions: Option<String>,
}

impl From<&Pickup> for PickupResponse {
    fn from(pickup: &Pickup) -> Self {
        Self {
            carrier_pickup_id: pickup.carrier_pickup_id().to_string(),
            status: pickup.status().to_string(),
            min_datetime: pickup.window().min().to_rfc3339(),
            max_datetime: pickup.window().max().to_rfc3339(),
            instructions: pickup.instructions().map(String::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceivableResponse {
    pub receivable: bool,
    pub blockers: Vec<String>,
}

impl From<ReceiptCheck> for ReceivableResponse {
    fn from(check: ReceiptCheck) -> Self {
        Self {
            receivable: check.receivable,
            blockers: check.blockers.iter().map(ToString::to_string).collect(),
        }
    }
}

// -- Handlers --

/// GET /line-items/:id: read a line item as its buyer or seller.
#[tracing::instrument(skip(state))]
pub async fn get<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<LineItemResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let item = state.line_items.get(id, caller).await?;
    Ok(Json(LineItemResponse::from(&item)))
}

/// POST /line-items/:id/confirm-to-ship: the seller queues the item for
/// the next batch.
#[tracing::instrument(skip(state))]
pub async fn confirm_to_ship<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<LineItemResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let item = state.line_items.confirm_to_ship(id, caller).await?;
    Ok(Json(LineItemResponse::from(&item)))
}

/// POST /line-items/:id/label: the seller buys a label right away.
///
/// Carrier failures leave the item in `label_failure` and still answer 200
/// with the item, as a batch run would.
#[tracing::instrument(skip(state))]
pub async fn purchase_label<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<LineItemResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let item = state.pipeline.purchase_label(id, caller).await?;
    Ok(Json(LineItemResponse::from(&item)))
}

/// POST /line-items/:id/cancel: cancel and refund.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("A cancel reason is required".to_string()));
    }
    let report = state.cancellation.cancel(id, caller, reason).await?;
    Ok(Json(CancelResponse::from(&report)))
}

/// POST /line-items/:id/pickup: book a carrier pickup.
#[tracing::instrument(skip(state, req))]
pub async fn create_pickup<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
    Json(req): Json<PickupRequest>,
) -> Result<(StatusCode, Json<PickupResponse>), ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let pickup = state
        .cancellation
        .create_pickup(id, caller, req.min_datetime, req.max_datetime, req.instructions)
        .await?;
    Ok((StatusCode::CREATED, Json(PickupResponse::from(&pickup))))
}

/// DELETE /line-items/:id/pickup: cancel the booked pickup.
#[tracing::instrument(skip(state))]
pub async fn cancel_pickup<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<StatusCode, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    state.cancellation.cancel_pickup(id, caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /line-items/:id/receive: the buyer confirms delivery.
#[tracing::instrument(skip(state))]
pub async fn receive<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<LineItemResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let item = state.line_items.receive(id, caller).await?;
    Ok(Json(LineItemResponse::from(&item)))
}

/// GET /line-items/:id/receivable: advisory receipt check.
#[tracing::instrument(skip(state))]
pub async fn receivable<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<ReceivableResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let check = state.line_items.check_receivable(id, caller).await?;
    Ok(Json(ReceivableResponse::from(check)))
}

/// POST /line-items/:id/return: the buyer sends the item back.
#[tracing::instrument(skip(state))]
pub async fn start_return<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<LineItemResponse>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    let item = state.line_items.start_return(id, caller).await?;
    Ok(Json(LineItemResponse::from(&item)))
}

/// GET /line-items/:id/history: committed status changes, oldest first.
#[tracing::instrument(skip(state))]
pub async fn history<S, C, P, N>(
    State(state): AppStateRef<S, C, P, N>,
    Path(id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<Vec<TransitionRecord>>, ApiError>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    let id = parse_line_item_id(&id)?;
    Ok(Json(state.line_items.history(id, caller).await?))
}

fn parse_line_item_id(id: &str) -> Result<LineItemId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
