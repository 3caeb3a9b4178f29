//! Batch label purchase.
//!
//! A run reserves every line item ready to ship, submits one carrier batch
//! for them, buys postage exactly once when the batch is ready, waits for
//! the results and records each item's outcome. One item's failure never
//! stops the others: it ends in `label_failure` with a reason and the seller
//! can confirm it again.

use std::collections::HashSet;
use std::time::Instant;

use common::{LineItemId, ShipmentId, UserId};
use domain::{
    CarrierReference, CarrierShipmentId, CustomsDeclaration, CustomsItem, LineItem,
    LineItemCommand, LineItemStatus, Listing, Order,
};
use fulfillment_store::{FulfillmentStore, FulfillmentStoreExt};
use uuid::Uuid;

use crate::access::Parties;
use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::retry::SettlePolicy;
use crate::services::Notifier;
use crate::services::carrier::{
    BatchShipmentStatus, CarrierBatch, CarrierError, CarrierGateway, CarrierShipment,
    DEFAULT_CARRIER, DEFAULT_SERVICE, ShipmentDraft, ShipmentRequest,
};
use crate::sync::{ShipmentSync, label_command};

/// Lease serializing batch runs across processes.
pub const BATCH_LEASE: &str = "batch_submission";

pub const PURCHASE_FAILED: &str = "Shipment failed to purchase label";
pub const SETTLEMENT_TIMEOUT: &str = "Timed out waiting for carrier batch settlement";
pub const MISSING_FROM_BATCH: &str = "Shipment missing from carrier batch";
pub const LABEL_MISSING: &str = "Carrier returned no label for the purchased shipment";
pub const UNEXPECTED_BATCH_STATUS: &str = "Unexpected batch status.";

/// Builds the carrier request for one line item.
pub fn shipment_request(item: &LineItem, order: &Order, listing: &Listing) -> ShipmentRequest {
    let origin = listing.seller_address();
    let customs = CustomsDeclaration::single_item(
        origin.name.clone(),
        CustomsItem {
            description: listing.title().to_string(),
            quantity: 1,
            value: listing.seller_price(),
            weight_oz: listing.weight_oz(),
            origin_country: origin.country.clone(),
        },
    );
    ShipmentRequest {
        reference: CarrierReference::LineItem(item.id()).to_string(),
        to_address: order.destination(),
        from_address: origin.clone(),
        parcel: listing.parcel(),
        customs_info: Some(customs),
        carrier: DEFAULT_CARRIER.to_string(),
        service: DEFAULT_SERVICE.to_string(),
    }
}

/// What one batch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRunReport {
    pub batch_id: Option<String>,
    /// Line items reserved and sent to the carrier.
    pub submitted: usize,
    /// Shipments whose label was recorded.
    pub shipment_ids: Vec<ShipmentId>,
    /// Line items whose label purchase failed, with the reason.
    pub failed: Vec<(LineItemId, String)>,
    /// Line items that already owned a purchased label and were moved to
    /// `label_printed` without buying another.
    pub reused: Vec<LineItemId>,
}

/// Submits ready line items to the carrier in one batch.
pub struct BatchPipeline<S, C, N> {
    store: S,
    sync: ShipmentSync<S, C, N>,
    settle: SettlePolicy,
    lease_ttl: chrono::Duration,
    holder: String,
}

impl<S, C, N> BatchPipeline<S, C, N>
where
    S: FulfillmentStore + Clone,
    C: CarrierGateway,
    N: Notifier,
{
    pub fn new(store: S, carrier: C, notifier: N, config: &FulfillmentConfig) -> Self {
        Self {
            sync: ShipmentSync::new(store.clone(), carrier, notifier, config),
            store,
            settle: config.settle,
            lease_ttl: config.lease_ttl(),
            holder: format!("batch-{}", Uuid::new_v4()),
        }
    }

    /// Runs one batch submission under the batch lease.
    ///
    /// Fails with [`FulfillmentError::LeaseHeld`] while another run holds
    /// the lease. Carrier failures are recorded per item and reported, not
    /// returned.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<BatchRunReport> {
        let lease = self
            .store
            .try_acquire_lease(BATCH_LEASE, &self.holder, self.lease_ttl)
            .await?
            .ok_or(FulfillmentError::LeaseHeld(BATCH_LEASE))?;

        let started = Instant::now();
        let result = self.submit().await;

        if let Err(err) = self.store.release_lease(&lease).await {
            tracing::warn!(error = %err, "Could not release batch lease");
        }

        metrics::counter!("fulfillment_batch_runs_total").increment(1);
        metrics::histogram!("fulfillment_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Ok(report) = &result {
            metrics::counter!("fulfillment_batch_items_failed_total")
                .increment(report.failed.len() as u64);
            tracing::info!(
                batch_id = ?report.batch_id,
                submitted = report.submitted,
                labeled = report.shipment_ids.len(),
                reused = report.reused.len(),
                failed = report.failed.len(),
                "Batch run finished"
            );
        }
        result
    }

    async fn submit(&self) -> Result<BatchRunReport> {
        let mut report = BatchRunReport::default();
        let candidates = self
            .store
            .line_items_with_status(&[LineItemStatus::Active, LineItemStatus::ReadyToShip])
            .await?;

        let mut pending: Vec<(LineItemId, ShipmentRequest)> = Vec::new();
        for item in candidates {
            match self.reuse_label(&item).await {
                Ok(true) => {
                    report.reused.push(item.id());
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(line_item_id = %item.id(), error = %err, "Line item skipped");
                    continue;
                }
            }
            match self.reserve(&item).await {
                Ok(request) => pending.push((item.id(), request)),
                Err(FulfillmentError::Guard(err)) => {
                    tracing::debug!(line_item_id = %item.id(), error = %err, "Line item moved on, skipped");
                }
                Err(err) => self.fail(&mut report, item.id(), &err.to_string()).await,
            }
        }
        report.submitted = pending.len();
        if pending.is_empty() {
            return Ok(report);
        }

        let carrier = self.sync.carrier();
        let requests: Vec<ShipmentRequest> = pending.iter().map(|(_, r)| r.clone()).collect();
        let batch = match carrier.create_batch(&requests).await {
            Ok(batch) => batch,
            Err(err) => {
                self.fail_all(&mut report, &pending, &err.to_string()).await;
                return Ok(report);
            }
        };
        report.batch_id = Some(batch.id.clone());
        tracing::info!(batch_id = %batch.id, items = pending.len(), "Carrier batch created");
        self.renew_lease().await;

        for (id, _) in &pending {
            let batch_id = batch.id.as_str();
            if let Err(err) = self
                .sync
                .handler()
                .update(*id, |item| item.assign_batch(batch_id))
                .await
            {
                tracing::warn!(line_item_id = %id, error = %err, "Could not store batch id");
            }
        }

        let ready = match self
            .wait_for(batch, |b| b.state.is_buy_ready() || b.state.is_final())
            .await
        {
            Ok(Some(ready)) if ready.state.is_buy_ready() => ready,
            Ok(Some(ready)) => {
                let reason = format!("Carrier batch ended in state {:?}", ready.state);
                self.fail_all(&mut report, &pending, &reason).await;
                return Ok(report);
            }
            Ok(None) => {
                self.fail_all(&mut report, &pending, SETTLEMENT_TIMEOUT).await;
                return Ok(report);
            }
            Err(err) => {
                self.fail_all(&mut report, &pending, &err.to_string()).await;
                return Ok(report);
            }
        };

        self.renew_lease().await;

        // Buying is the one call that must never repeat for a batch
        let bought = match carrier.buy_batch(&ready.id).await {
            Ok(bought) => bought,
            Err(err) => {
                self.fail_all(&mut report, &pending, &err.to_string()).await;
                return Ok(report);
            }
        };

        let settled = match self.wait_for(bought, CarrierBatch::is_settled).await {
            Ok(Some(settled)) => settled,
            Ok(None) => {
                self.fail_all(&mut report, &pending, SETTLEMENT_TIMEOUT).await;
                return Ok(report);
            }
            Err(err) => {
                self.fail_all(&mut report, &pending, &err.to_string()).await;
                return Ok(report);
            }
        };

        let submitted: HashSet<LineItemId> = pending.iter().map(|(id, _)| *id).collect();
        let mut seen = HashSet::new();
        for entry in &settled.shipments {
            let Some(id) = entry
                .reference
                .as_deref()
                .and_then(CarrierReference::line_item_id)
            else {
                tracing::warn!(carrier_shipment_id = %entry.id, "Batch shipment without our reference");
                continue;
            };
            if !submitted.contains(&id) || !seen.insert(id) {
                tracing::warn!(line_item_id = %id, "Unexpected line item in batch");
                continue;
            }

            match entry.batch_status {
                BatchShipmentStatus::PostagePurchased => {
                    self.record_purchase(&mut report, id, &entry.id).await;
                }
                status if status.is_failure() => {
                    self.fail(&mut report, id, PURCHASE_FAILED).await;
                }
                status => {
                    tracing::warn!(line_item_id = %id, ?status, "Unexpected batch status");
                    self.fail(&mut report, id, UNEXPECTED_BATCH_STATUS).await;
                }
            }
        }

        for (id, _) in &pending {
            if !seen.contains(id) {
                self.fail(&mut report, *id, MISSING_FROM_BATCH).await;
            }
        }
        Ok(report)
    }

    /// Records a label the item already owns instead of buying another.
    ///
    /// A purchase that settled after its run gave up still reaches the item
    /// through a webhook or polling. Returns true when the item moved to
    /// `label_printed` this way.
    async fn reuse_label(&self, item: &LineItem) -> Result<bool> {
        let Some(shipment) = self.store.shipment_for_line_item(item.id()).await? else {
            return Ok(false);
        };
        let Some(command) = label_command(item, &shipment) else {
            return Ok(false);
        };
        self.sync.handler().execute(item.id(), command).await?;
        self.sync.notify_sold(&shipment).await;
        tracing::info!(
            line_item_id = %item.id(),
            carrier_shipment_id = %shipment.carrier_shipment_id(),
            "Reusing purchased label"
        );
        metrics::counter!("fulfillment_labels_reused_total").increment(1);
        Ok(true)
    }

    /// Extends the batch lease before the next long wait.
    async fn renew_lease(&self) {
        match self
            .store
            .try_acquire_lease(BATCH_LEASE, &self.holder, self.lease_ttl)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!("Batch lease taken over by another run"),
            Err(err) => tracing::warn!(error = %err, "Could not renew batch lease"),
        }
    }

    /// Builds the request and moves the item to `label_pending`.
    ///
    /// The versioned transition doubles as the item's reservation: a second
    /// process selecting the same item loses the commit and skips it.
    async fn reserve(&self, item: &LineItem) -> Result<ShipmentRequest> {
        let request = self.build_request(item).await?;
        self.sync
            .handler()
            .execute(item.id(), LineItemCommand::WaitToPrintLabel)
            .await?;
        Ok(request)
    }

    async fn build_request(&self, item: &LineItem) -> Result<ShipmentRequest> {
        let order = self.store.require_order(item.order_id()).await?;
        let listing = self.store.require_listing(item.listing_id()).await?;
        Ok(shipment_request(item, &order, &listing))
    }

    /// Polls until `done` holds, backing off between polls. `None` on
    /// timeout.
    async fn wait_for<F>(
        &self,
        mut batch: CarrierBatch,
        done: F,
    ) -> std::result::Result<Option<CarrierBatch>, CarrierError>
    where
        F: Fn(&CarrierBatch) -> bool,
    {
        let deadline = tokio::time::Instant::now() + self.settle.timeout;
        let mut poll = 0;
        while !done(&batch) {
            let delay = self.settle.delay_for(poll);
            if tokio::time::Instant::now() + delay > deadline {
                tracing::warn!(batch_id = %batch.id, state = ?batch.state, "Batch did not settle in time");
                return Ok(None);
            }
            tokio::time::sleep(delay).await;
            batch = self.sync.carrier().retrieve_batch(&batch.id).await?;
            poll += 1;
        }
        Ok(Some(batch))
    }

    async fn record_purchase(
        &self,
        report: &mut BatchRunReport,
        id: LineItemId,
        carrier_id: &CarrierShipmentId,
    ) {
        let remote = match self.sync.carrier().retrieve_shipment(carrier_id).await {
            Ok(remote) => remote,
            Err(err) => return self.fail(report, id, &err.to_string()).await,
        };
        match self.sync.merge_carrier_shipment(Some(id), remote).await {
            Ok(outcome) => {
                report.shipment_ids.push(outcome.shipment.id());
                if !outcome.label_printed && self.still_pending(id).await {
                    self.fail(report, id, LABEL_MISSING).await;
                }
            }
            Err(err) => self.fail(report, id, &err.to_string()).await,
        }
    }

    async fn still_pending(&self, id: LineItemId) -> bool {
        matches!(
            self.store.get_line_item(id).await,
            Ok(Some(item)) if item.status() == LineItemStatus::LabelPending
        )
    }

    async fn fail(&self, report: &mut BatchRunReport, id: LineItemId, reason: &str) {
        self.sync.handler().fail_label(id, reason).await;
        report.failed.push((id, reason.to_string()));
    }

    async fn fail_all(
        &self,
        report: &mut BatchRunReport,
        pending: &[(LineItemId, ShipmentRequest)],
        reason: &str,
    ) {
        for (id, _) in pending {
            self.fail(report, *id, reason).await;
        }
    }

    /// The seller buys one label right away instead of waiting for the next
    /// batch run.
    #[tracing::instrument(skip(self))]
    pub async fn purchase_label(&self, id: LineItemId, actor: UserId) -> Result<LineItem> {
        Parties::load(&self.store, id).await?.require_seller(actor)?;
        self.purchase_label_individually(id).await
    }

    /// Buys one label outside a batch.
    ///
    /// Registers the addresses, parcel and customs form at the carrier, then
    /// creates the shipment with postage. The result is recorded exactly
    /// like a batch result. An item that already owns a purchased label is
    /// moved to `label_printed` with it.
    #[tracing::instrument(skip(self))]
    pub async fn purchase_label_individually(&self, id: LineItemId) -> Result<LineItem> {
        let (item, _) = self.sync.handler().load(id).await?;
        if self.reuse_label(&item).await? {
            return Ok(self.sync.handler().load(id).await?.0);
        }
        let request = self.build_request(&item).await?;
        self.sync
            .handler()
            .execute(id, LineItemCommand::WaitToPrintLabel)
            .await?;

        match self.buy_single(&request).await {
            Ok(remote) => match self.sync.merge_carrier_shipment(Some(id), remote).await {
                Ok(outcome) => {
                    if !outcome.label_printed && self.still_pending(id).await {
                        self.sync.handler().fail_label(id, LABEL_MISSING).await;
                    }
                }
                Err(err) => {
                    self.sync.handler().fail_label(id, &err.to_string()).await;
                    return Err(err);
                }
            },
            Err(err) => {
                self.sync.handler().fail_label(id, &err.to_string()).await;
            }
        }

        Ok(self.sync.handler().load(id).await?.0)
    }

    async fn buy_single(
        &self,
        request: &ShipmentRequest,
    ) -> std::result::Result<CarrierShipment, CarrierError> {
        let carrier = self.sync.carrier();
        let to_address = carrier.create_address(&request.to_address).await?;
        let from_address = carrier.create_address(&request.from_address).await?;
        let parcel = carrier.create_parcel(&request.parcel).await?;
        let customs_info = match &request.customs_info {
            Some(customs) => Some(carrier.create_customs_info(customs).await?),
            None => None,
        };
        let draft = ShipmentDraft {
            reference: request.reference.clone(),
            to_address,
            from_address,
            parcel,
            customs_info,
            carrier: request.carrier.clone(),
            service: request.service.clone(),
        };
        carrier.create_shipment(&draft, true).await
    }
}
