//! Cancellation, refunds and carrier pickups.
//!
//! Canceling commits the line item transition first. The side effects that
//! follow (pickup cancel, label refund, payment refund, buyer notification)
//! each run independently: a failure is stored as a pending
//! [`CompensationTask`] and retried by the reconciliation job, and never
//! undoes the cancellation.

use chrono::{DateTime, Utc};
use common::{LineItemId, UserId};
use domain::{
    CarrierReference, CompensationStep, CompensationTask, LineItem, LineItemCommand,
    LineItemStatus, Pickup, PickupStatus, PickupWindow, RefundPolicy, Shipment,
};
use fulfillment_store::{FulfillmentStore, UnitOfWork};

use crate::access::Parties;
use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::handler::LineItemHandler;
use crate::services::carrier::{CarrierGateway, PickupRequest};
use crate::services::{Notifier, PaymentGateway};

pub const PICKUP_NEEDS_SHIPMENT: &str = "Shipment was not created yet.";
pub const PICKUP_FOR_CANCELED: &str = "Canceled shipment can not be picked up.";
pub const PICKUP_ALREADY_SCHEDULED: &str = "Pickup already scheduled.";
pub const PICKUP_NOT_FOUND: &str = "Pickup not found.";

/// Side effects in the order they run.
const STEPS: [CompensationStep; 4] = [
    CompensationStep::CancelPickup,
    CompensationStep::CarrierRefund,
    CompensationStep::PaymentRefund,
    CompensationStep::NotifyBuyer,
];

/// How one cancellation side effect went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Nothing to do, with the reason.
    Skipped(String),
    /// Queued for retry, with the error.
    Failed(String),
}

/// The canceled line item and what happened to each side effect.
#[derive(Debug, Clone)]
pub struct CancellationReport {
    pub line_item: LineItem,
    pub steps: Vec<(CompensationStep, StepOutcome)>,
}

impl CancellationReport {
    pub fn outcome(&self, step: CompensationStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// True when no side effect was queued for retry.
    pub fn is_complete(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|(_, outcome)| matches!(outcome, StepOutcome::Failed(_)))
    }
}

/// Cancels line items and manages their pickups.
pub struct CancellationService<S, C, P, N> {
    store: S,
    carrier: C,
    payment: P,
    notifier: N,
    handler: LineItemHandler<S>,
    refund_policy: RefundPolicy,
}

impl<S, C, P, N> CancellationService<S, C, P, N>
where
    S: FulfillmentStore + Clone,
    C: CarrierGateway,
    P: PaymentGateway,
    N: Notifier,
{
    pub fn new(store: S, carrier: C, payment: P, notifier: N, config: &FulfillmentConfig) -> Self {
        Self {
            handler: LineItemHandler::new(store.clone(), config.conflict_retries),
            store,
            carrier,
            payment,
            notifier,
            refund_policy: config.refund_policy(),
        }
    }

    /// Cancels a line item on behalf of its buyer or seller.
    ///
    /// Fails only if the cancellation itself is refused. Side effects that
    /// fail afterwards are reported and queued, not returned as errors.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        id: LineItemId,
        actor: UserId,
        reason: &str,
    ) -> Result<CancellationReport> {
        let parties = Parties::load(&self.store, id).await?;
        parties.require_party(actor)?;

        let command = LineItemCommand::Cancel {
            reason: reason.to_string(),
        };
        let line_item = self.handler.execute(id, command).await?;
        tracing::info!(line_item_id = %id, reason, "Line item canceled");
        metrics::counter!("fulfillment_cancellations_total").increment(1);

        let mut steps = Vec::with_capacity(STEPS.len());
        for step in STEPS {
            let outcome = self.run_step(step, &parties, reason).await;
            if let StepOutcome::Failed(error) = &outcome {
                self.queue_compensation(id, step, reason, error).await;
            }
            steps.push((step, outcome));
        }

        Ok(CancellationReport { line_item, steps })
    }

    async fn run_step(&self, step: CompensationStep, parties: &Parties, reason: &str) -> StepOutcome {
        match self.try_step(step, parties, reason).await {
            Ok(outcome) => outcome,
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }

    async fn try_step(
        &self,
        step: CompensationStep,
        parties: &Parties,
        reason: &str,
    ) -> Result<StepOutcome> {
        let id = parties.item.id();
        match step {
            CompensationStep::CancelPickup | CompensationStep::CarrierRefund => {
                let Some(shipment) = self.store.shipment_for_line_item(id).await? else {
                    return Ok(StepOutcome::Skipped("no shipment".to_string()));
                };
                if !shipment.can_refund(Utc::now(), &self.refund_policy) {
                    return Ok(StepOutcome::Skipped("label not refundable".to_string()));
                }
                if step == CompensationStep::CancelPickup {
                    self.cancel_active_pickup(&shipment).await
                } else {
                    self.refund_label(&shipment).await
                }
            }
            CompensationStep::PaymentRefund => {
                let Some(payment) = parties.order.payment_reference() else {
                    return Ok(StepOutcome::Skipped("no payment on order".to_string()));
                };
                let key = format!("cancel-{id}");
                let refund = self
                    .payment
                    .refund(payment, parties.listing.buyer_price(), &key)
                    .await?;
                tracing::info!(line_item_id = %id, refund_id = %refund.refund_id, amount = %refund.amount, "Buyer refunded");
                Ok(StepOutcome::Completed)
            }
            CompensationStep::NotifyBuyer => {
                self.notifier
                    .notify_buyer_canceled(parties.order.buyer_id(), parties.listing.title(), reason)
                    .await?;
                Ok(StepOutcome::Completed)
            }
        }
    }

    async fn cancel_active_pickup(&self, shipment: &Shipment) -> Result<StepOutcome> {
        match self.store.pickup_for_shipment(shipment.id()).await? {
            Some(pickup) if pickup.is_active() => {
                self.remove_pickup(pickup).await?;
                Ok(StepOutcome::Completed)
            }
            _ => Ok(StepOutcome::Skipped("no active pickup".to_string())),
        }
    }

    async fn refund_label(&self, shipment: &Shipment) -> Result<StepOutcome> {
        let status = self
            .carrier
            .refund_shipment(shipment.carrier_shipment_id())
            .await?;
        if !status.is_accepted() {
            return Ok(StepOutcome::Failed(format!(
                "carrier refused the refund ({status:?})"
            )));
        }
        tracing::info!(carrier_shipment_id = %shipment.carrier_shipment_id(), "Label refund submitted");
        Ok(StepOutcome::Completed)
    }

    /// Cancels the pickup at the carrier, then deletes the local record.
    async fn remove_pickup(&self, mut pickup: Pickup) -> Result<()> {
        self.carrier.cancel_pickup(pickup.carrier_pickup_id()).await?;
        // A pickup never bought has no scheduled -> canceled transition
        let change = pickup.cancel(Utc::now()).ok();
        let unit = UnitOfWork::new()
            .record_opt(&pickup, change)
            .without_pickup(pickup);
        self.store.commit(unit).await?;
        Ok(())
    }

    async fn queue_compensation(
        &self,
        id: LineItemId,
        step: CompensationStep,
        reason: &str,
        error: &str,
    ) {
        tracing::warn!(line_item_id = %id, step = %step, error, "Cancellation step failed, queued for retry");
        metrics::counter!("fulfillment_compensation_failures_total", "step" => step.as_str())
            .increment(1);
        let task = CompensationTask::new(id, step, reason, error, Utc::now());
        if let Err(err) = self.store.commit(UnitOfWork::new().with_compensation(task)).await {
            tracing::error!(line_item_id = %id, step = %step, error = %err, "Could not queue compensation");
        }
    }

    /// Runs every pending compensation task once more. Returns how many
    /// were resolved.
    #[tracing::instrument(skip(self))]
    pub async fn retry_pending_compensations(&self) -> Result<usize> {
        let tasks = self.store.pending_compensations().await?;
        let mut resolved = 0;
        for mut task in tasks {
            let outcome = match Parties::load(&self.store, task.line_item_id()).await {
                Ok(parties) => {
                    self.run_step(task.step(), &parties, task.cancel_reason())
                        .await
                }
                Err(err) => StepOutcome::Failed(err.to_string()),
            };
            match outcome {
                StepOutcome::Failed(error) => {
                    tracing::warn!(
                        line_item_id = %task.line_item_id(),
                        step = %task.step(),
                        attempts = task.attempts() + 1,
                        error = %error,
                        "Compensation still failing"
                    );
                    metrics::counter!("fulfillment_compensation_failures_total", "step" => task.step().as_str())
                        .increment(1);
                    task.record_failure(error);
                }
                StepOutcome::Completed | StepOutcome::Skipped(_) => {
                    task.resolve(Utc::now());
                    resolved += 1;
                }
            }
            if let Err(err) = self.store.commit(UnitOfWork::new().with_compensation(task)).await {
                tracing::warn!(error = %err, "Could not store compensation attempt");
            }
        }
        Ok(resolved)
    }

    /// Books a carrier pickup for the line item's shipment at the seller's
    /// address.
    #[tracing::instrument(skip(self, instructions))]
    pub async fn create_pickup(
        &self,
        id: LineItemId,
        actor: UserId,
        min_datetime: DateTime<Utc>,
        max_datetime: DateTime<Utc>,
        instructions: Option<String>,
    ) -> Result<Pickup> {
        let parties = Parties::load(&self.store, id).await?;
        parties.require_seller(actor)?;
        let window = PickupWindow::new(min_datetime, max_datetime)?;

        if parties.item.status() == LineItemStatus::Canceled {
            return Err(FulfillmentError::Rejected(PICKUP_FOR_CANCELED.to_string()));
        }
        let shipment = self
            .store
            .shipment_for_line_item(id)
            .await?
            .ok_or_else(|| FulfillmentError::Rejected(PICKUP_NEEDS_SHIPMENT.to_string()))?;
        if let Some(existing) = self.store.pickup_for_shipment(shipment.id()).await?
            && existing.is_active()
        {
            return Err(FulfillmentError::Rejected(PICKUP_ALREADY_SCHEDULED.to_string()));
        }

        let reference = CarrierReference::Shipment(shipment.id()).to_string();
        let request = PickupRequest {
            reference: reference.clone(),
            shipment_id: shipment.carrier_shipment_id().clone(),
            address: parties.listing.seller_address().clone(),
            min_datetime: window.min(),
            max_datetime: window.max(),
            instructions: instructions.clone(),
        };
        let mut remote = self.carrier.create_and_buy_pickup(&request).await?;
        if PickupStatus::from_carrier_status(&remote.status) == PickupStatus::Unknown {
            remote = self.carrier.buy_pickup(&remote.id).await?;
        }

        let pickup = Pickup::new(
            shipment.id(),
            remote.id,
            reference,
            window,
            instructions,
            PickupStatus::from_carrier_status(&remote.status),
            Utc::now(),
        );
        let committed = match self.store.commit(UnitOfWork::new().with_pickup(pickup.clone())).await {
            Ok(committed) => committed,
            Err(err) if err.is_conflict() => {
                return Err(FulfillmentError::Rejected(PICKUP_ALREADY_SCHEDULED.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(line_item_id = %id, carrier_pickup_id = %pickup.carrier_pickup_id(), "Pickup booked");
        Ok(committed.pickups.into_iter().next().unwrap_or(pickup))
    }

    /// Cancels the line item's pickup at the carrier and deletes it.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_pickup(&self, id: LineItemId, actor: UserId) -> Result<()> {
        let parties = Parties::load(&self.store, id).await?;
        parties.require_seller(actor)?;

        let not_found = || FulfillmentError::Rejected(PICKUP_NOT_FOUND.to_string());
        let shipment = self
            .store
            .shipment_for_line_item(id)
            .await?
            .ok_or_else(not_found)?;
        let pickup = self
            .store
            .pickup_for_shipment(shipment.id())
            .await?
            .filter(Pickup::is_active)
            .ok_or_else(not_found)?;
        self.remove_pickup(pickup).await
    }
}
