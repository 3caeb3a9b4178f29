//! Reconciliation of local state with the carrier.
//!
//! Carrier webhooks and the polling job are two views of the same facts.
//! Both funnel into [`ShipmentSync`], so a shipment or tracker seen through
//! either path (or both, in any order, any number of times) ends in the
//! same local state.

use common::LineItemId;
use domain::{CarrierReference, LineItemStatus, Shipment, ShipmentStatus};
use fulfillment_store::FulfillmentStore;
use uuid::Uuid;

use crate::batch::{PURCHASE_FAILED, UNEXPECTED_BATCH_STATUS};
use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::services::Notifier;
use crate::services::carrier::{
    BatchShipment, BatchShipmentStatus, CarrierBatch, CarrierEvent, CarrierGateway,
    CarrierTracker,
};
use crate::sync::ShipmentSync;

/// Lease serializing polling runs across processes.
pub const RECONCILIATION_LEASE: &str = "reconciliation";

/// What handling one carrier event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was merged; `changed` counts records that moved.
    Applied { changed: usize },
    /// The event needed no work.
    Ignored(&'static str),
}

/// What one polling run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub changed: usize,
    /// Orphan shipments attached to their line item.
    pub attached: usize,
    pub errors: usize,
}

/// Applies carrier webhooks and polls shipments still in flight.
pub struct Reconciler<S, C, N> {
    store: S,
    sync: ShipmentSync<S, C, N>,
    lease_ttl: chrono::Duration,
    holder: String,
}

impl<S, C, N> Reconciler<S, C, N>
where
    S: FulfillmentStore + Clone,
    C: CarrierGateway,
    N: Notifier,
{
    pub fn new(store: S, carrier: C, notifier: N, config: &FulfillmentConfig) -> Self {
        Self {
            sync: ShipmentSync::new(store.clone(), carrier, notifier, config),
            store,
            lease_ttl: config.lease_ttl(),
            holder: format!("reconcile-{}", Uuid::new_v4()),
        }
    }

    /// Decodes a raw webhook body and applies it.
    ///
    /// Only an undecodable body is an error; everything after decoding is
    /// absorbed and logged so the carrier keeps delivering.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<EventOutcome> {
        let event = self
            .sync
            .carrier()
            .process_inbound_event(payload)
            .map_err(|err| FulfillmentError::InvalidEvent(err.to_string()))?;
        self.handle_event(event).await
    }

    #[tracing::instrument(skip(self, event), fields(kind = event.kind()))]
    pub async fn handle_event(&self, event: CarrierEvent) -> Result<EventOutcome> {
        let kind = event.kind().to_string();
        let result = match event {
            CarrierEvent::Tracker(tracker) => self.on_tracker(tracker).await,
            CarrierEvent::BatchUpdated {
                batch,
                previous_state,
            } => self.on_batch_updated(batch, previous_state.as_deref()).await,
            CarrierEvent::Other { description } => {
                tracing::debug!(%description, "Carrier event not handled");
                Ok(EventOutcome::Ignored("unhandled event"))
            }
        };

        let outcome = match &result {
            Ok(EventOutcome::Applied { .. }) => "applied",
            Ok(EventOutcome::Ignored(_)) => "ignored",
            Err(_) => "error",
        };
        metrics::counter!("fulfillment_webhook_events_total", "kind" => kind, "outcome" => outcome)
            .increment(1);
        result
    }

    async fn on_tracker(&self, tracker: CarrierTracker) -> Result<EventOutcome> {
        let Some(carrier_id) = tracker.shipment_id.clone() else {
            tracing::warn!(tracker_id = %tracker.id, "Tracker without shipment");
            return Ok(EventOutcome::Ignored("tracker without shipment"));
        };
        let Some(shipment) = self.store.shipment_by_carrier_id(&carrier_id).await? else {
            tracing::warn!(carrier_shipment_id = %carrier_id, "Unknown shipment found.");
            return Ok(EventOutcome::Ignored("unknown shipment"));
        };

        // The delivered body may already be outdated
        let tracker = match self.sync.carrier().retrieve_tracker(&tracker.id).await {
            Ok(fresh) => fresh,
            Err(err) => {
                tracing::debug!(error = %err, "Using tracker from event body");
                tracker
            }
        };
        let merge = self.sync.merge_tracker(&shipment, tracker.to_update()).await?;
        Ok(EventOutcome::Applied {
            changed: usize::from(merge.is_change()),
        })
    }

    /// Handles a batch that was just bought. Other batch transitions are
    /// noise: the pipeline that created the batch is still watching it.
    async fn on_batch_updated(
        &self,
        batch: CarrierBatch,
        previous_state: Option<&str>,
    ) -> Result<EventOutcome> {
        if previous_state != Some("created") {
            return Ok(EventOutcome::Ignored("batch not leaving created"));
        }

        let mut changed = 0;
        for entry in &batch.shipments {
            let Some(id) = entry
                .reference
                .as_deref()
                .and_then(CarrierReference::line_item_id)
            else {
                tracing::warn!(carrier_shipment_id = %entry.id, reference = ?entry.reference, "Unknown reference in batch");
                continue;
            };
            match self.on_batch_shipment(&batch.id, id, entry).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(line_item_id = %id, error = %err, "Batch shipment not reconciled");
                }
            }
        }
        Ok(EventOutcome::Applied { changed })
    }

    async fn on_batch_shipment(
        &self,
        batch_id: &str,
        id: LineItemId,
        entry: &BatchShipment,
    ) -> Result<bool> {
        let item = self.store.get_line_item(id).await?;
        let reason = match entry.batch_status {
            BatchShipmentStatus::PostagePurchased => {
                if item.is_none() {
                    tracing::warn!(line_item_id = %id, "Purchased shipment for unknown line item, kept unowned");
                }
                let remote = self.sync.carrier().retrieve_shipment(&entry.id).await?;
                let owner = item.as_ref().map(|_| id);
                let outcome = self.sync.merge_carrier_shipment(owner, remote).await?;
                return Ok(outcome.label_printed);
            }
            status if status.is_failure() => PURCHASE_FAILED,
            status => {
                tracing::warn!(line_item_id = %id, ?status, "Unexpected batch status");
                UNEXPECTED_BATCH_STATUS
            }
        };

        let Some(item) = item else {
            tracing::warn!(line_item_id = %id, "Unknown line item in batch shipment");
            return Ok(false);
        };
        // A replay for an older batch must not fail a newer attempt
        let same_batch = item.carrier_batch_id().is_none_or(|b| b == batch_id);
        if item.status() != LineItemStatus::LabelPending || !same_batch {
            return Ok(false);
        }
        Ok(self.sync.handler().fail_label(id, reason).await.is_some())
    }

    /// Re-polls every shipment the carrier may still move, under the
    /// reconciliation lease.
    #[tracing::instrument(skip(self))]
    pub async fn poll(&self) -> Result<PollReport> {
        let lease = self
            .store
            .try_acquire_lease(RECONCILIATION_LEASE, &self.holder, self.lease_ttl)
            .await?
            .ok_or(FulfillmentError::LeaseHeld(RECONCILIATION_LEASE))?;

        let result = self.poll_shipments().await;

        if let Err(err) = self.store.release_lease(&lease).await {
            tracing::warn!(error = %err, "Could not release reconciliation lease");
        }
        if let Ok(report) = &result {
            metrics::counter!("fulfillment_polled_shipments_total").increment(report.checked as u64);
            tracing::info!(
                checked = report.checked,
                changed = report.changed,
                attached = report.attached,
                errors = report.errors,
                "Reconciliation poll finished"
            );
        }
        result
    }

    async fn poll_shipments(&self) -> Result<PollReport> {
        let statuses: Vec<ShipmentStatus> = ShipmentStatus::ALL
            .into_iter()
            .filter(ShipmentStatus::needs_polling)
            .collect();
        let shipments = self.store.shipments_with_status(&statuses).await?;

        let mut report = PollReport::default();
        for shipment in shipments {
            report.checked += 1;
            match self.poll_one(&shipment).await {
                Ok((changed, attached)) => {
                    report.changed += usize::from(changed);
                    report.attached += usize::from(attached);
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::warn!(
                        carrier_shipment_id = %shipment.carrier_shipment_id(),
                        error = %err,
                        "Shipment poll failed"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn poll_one(&self, shipment: &Shipment) -> Result<(bool, bool)> {
        let carrier = self.sync.carrier();
        let remote = carrier.retrieve_shipment(shipment.carrier_shipment_id()).await?;
        let owner = shipment.line_item_id().or_else(|| {
            remote
                .reference
                .as_deref()
                .or(shipment.reference())
                .and_then(CarrierReference::line_item_id)
        });
        let embeds_tracker = remote.tracker.is_some();

        let outcome = self.sync.merge_carrier_shipment(owner, remote).await?;
        let attached = shipment.line_item_id().is_none() && outcome.shipment.line_item_id().is_some();
        let mut changed = attached
            || outcome.label_printed
            || outcome.shipment.status() != shipment.status()
            || outcome.tracker.is_some_and(|merge| merge.is_change());

        if !embeds_tracker
            && let Some(local) = self.store.tracker_for_shipment(shipment.id()).await?
        {
            let fresh = carrier.retrieve_tracker(local.carrier_tracker_id()).await?;
            let merge = self
                .sync
                .merge_tracker(&outcome.shipment, fresh.to_update())
                .await?;
            changed |= merge.is_change();
        }
        if attached {
            tracing::info!(
                carrier_shipment_id = %shipment.carrier_shipment_id(),
                line_item_id = ?outcome.shipment.line_item_id(),
                "Orphan shipment attached"
            );
        }
        Ok((changed, attached))
    }
}
