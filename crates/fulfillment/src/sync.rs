//! Mirrors carrier shipments and trackers into the store.
//!
//! Every path that learns about a carrier shipment (the batch pipeline, the
//! webhook handler and the polling job) goes through [`ShipmentSync`], so a
//! shipment is recorded the same way no matter which path sees it first,
//! and seeing it twice changes nothing.

use chrono::Utc;
use common::LineItemId;
use domain::{
    LineItem, LineItemCommand, LineItemStatus, Shipment, ShipmentStatus, ShipmentTracker,
    TrackerMerge, TrackerUpdate, TransitionGuards,
};
use fulfillment_store::{FulfillmentStore, UnitOfWork};

use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::handler::LineItemHandler;
use crate::services::Notifier;
use crate::services::carrier::{CarrierGateway, CarrierShipment};

/// Result of merging one carrier shipment.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub shipment: Shipment,
    /// The owning line item moved to `label_printed` during this merge.
    pub label_printed: bool,
    pub tracker: Option<TrackerMerge>,
}

/// Reconciles local shipment state with the carrier.
pub struct ShipmentSync<S, C, N> {
    store: S,
    carrier: C,
    notifier: N,
    handler: LineItemHandler<S>,
    max_attempts: u32,
}

impl<S, C, N> ShipmentSync<S, C, N>
where
    S: FulfillmentStore + Clone,
    C: CarrierGateway,
    N: Notifier,
{
    pub fn new(store: S, carrier: C, notifier: N, config: &FulfillmentConfig) -> Self {
        let max_attempts = config.conflict_retries.max(1);
        Self {
            handler: LineItemHandler::new(store.clone(), max_attempts),
            store,
            carrier,
            notifier,
            max_attempts,
        }
    }

    pub fn carrier(&self) -> &C {
        &self.carrier
    }

    pub fn handler(&self) -> &LineItemHandler<S> {
        &self.handler
    }

    /// Records a carrier shipment: get-or-create keyed on the carrier id,
    /// copy its carrier fields, attach it to its line item, move that item
    /// to `label_printed` once the label is there, and fold in the embedded
    /// tracker.
    ///
    /// With no resolvable line item the shipment is kept without an owner
    /// and attached later.
    #[tracing::instrument(skip(self, remote), fields(carrier_shipment_id = %remote.id))]
    pub async fn merge_carrier_shipment(
        &self,
        line_item_id: Option<LineItemId>,
        mut remote: CarrierShipment,
    ) -> Result<MergeOutcome> {
        let owner = match line_item_id {
            Some(id) => {
                let item = self.store.get_line_item(id).await?;
                if item.is_none() {
                    tracing::warn!(line_item_id = %id, "Unknown line item, keeping shipment unowned");
                }
                item
            }
            None => None,
        };

        let awaiting_label = owner
            .as_ref()
            .is_some_and(|item| item.status().can_print_label());
        if awaiting_label && remote.label_url().is_none() {
            // Batch results can list a shipment before its label is attached
            match self.carrier.retrieve_shipment(&remote.id).await {
                Ok(fresh) => remote = fresh,
                Err(err) => tracing::warn!(error = %err, "Could not resolve shipment label"),
            }
        }

        let owner_id = owner.as_ref().map(LineItem::id);
        let mut attempt = 0;
        let (shipment, label_printed) = loop {
            match self.try_merge(owner_id, &remote).await {
                Ok(merged) => break merged,
                Err(err) if err.is_conflict() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    tracing::debug!(attempt, "Conflict, reloading shipment");
                }
                Err(err) => return Err(err),
            }
        };

        if label_printed {
            self.notify_sold(&shipment).await;
        }

        let tracker = match &remote.tracker {
            Some(tracker) => Some(self.merge_tracker(&shipment, tracker.to_update()).await?),
            None => None,
        };

        Ok(MergeOutcome {
            shipment,
            label_printed,
            tracker,
        })
    }

    async fn try_merge(
        &self,
        owner: Option<LineItemId>,
        remote: &CarrierShipment,
    ) -> Result<(Shipment, bool)> {
        let now = Utc::now();
        let existing = self.store.shipment_by_carrier_id(&remote.id).await?;
        let mut changed = existing.is_none();
        let mut shipment = existing
            .unwrap_or_else(|| Shipment::new(remote.id.clone(), None, ShipmentStatus::Created, now));
        let mut unit = UnitOfWork::new();

        changed |= shipment.update_carrier_fields(
            remote.reference.as_deref(),
            remote.rate_id(),
            remote.label_url(),
            remote.tracking_code.as_deref(),
        );

        let mut targets = Vec::new();
        if shipment.label_url().is_some() {
            targets.push(ShipmentStatus::LabelGenerated);
        }
        if let Some(status) = remote
            .status
            .as_deref()
            .and_then(ShipmentStatus::from_carrier_status)
            && status != ShipmentStatus::LabelGenerated
        {
            targets.push(status);
        }
        for target in targets {
            if let Some(change) = shipment.advance(target, now) {
                unit = unit.record(&shipment, change);
                changed = true;
            }
        }

        let mut label_printed = false;
        let item = match owner {
            Some(id) => self.store.get_line_item(id).await?,
            None => None,
        };
        if let Some(mut item) = item {
            let id = item.id();
            let current = self.store.shipment_for_line_item(id).await?;
            let replaces = current
                .as_ref()
                .filter(|c| c.id() != shipment.id())
                .cloned();
            let awaiting_label = item.status() == LineItemStatus::LabelPending;

            match replaces {
                // A newer label for an item still waiting on one wins
                Some(mut previous) if awaiting_label => {
                    tracing::warn!(
                        line_item_id = %id,
                        previous = %previous.carrier_shipment_id(),
                        "Replacing line item shipment"
                    );
                    previous.detach_line_item();
                    unit = unit.with_shipment(previous);
                    changed |= shipment.attach_line_item(id);
                }
                Some(previous) => {
                    tracing::warn!(
                        line_item_id = %id,
                        current = %previous.carrier_shipment_id(),
                        "Line item already has a shipment, keeping this one unowned"
                    );
                }
                None => changed |= shipment.attach_line_item(id),
            }

            if shipment.line_item_id() == Some(id) {
                let mut item_changed = item.assign_carrier_shipment(remote.id.clone());
                if let Some(command) = label_command(&item, &shipment) {
                    let guards = TransitionGuards::with_shipment(shipment.facts());
                    match item.apply(&command, &guards, now) {
                        Ok(change) => {
                            unit = unit.record(&item, change);
                            label_printed = true;
                            item_changed = true;
                        }
                        Err(err) => {
                            tracing::warn!(line_item_id = %id, error = %err, "Label not recorded")
                        }
                    }
                }
                if item_changed {
                    unit = unit.with_line_item(item);
                }
            }
        }

        if changed {
            unit = unit.with_shipment(shipment.clone());
        }
        if unit.is_empty() {
            return Ok((shipment, false));
        }

        let committed = self.store.commit(unit).await?;
        let shipment = committed
            .shipments
            .into_iter()
            .find(|s| s.id() == shipment.id())
            .unwrap_or(shipment);
        Ok((shipment, label_printed))
    }

    pub(crate) async fn notify_sold(&self, shipment: &Shipment) {
        let (Some(item_id), Some(label_url)) = (shipment.line_item_id(), shipment.label_url()) else {
            return;
        };
        let result = async {
            let item = self.handler.load(item_id).await?.0;
            let listing = self.store.get_listing(item.listing_id()).await?;
            Ok::<_, FulfillmentError>(listing)
        }
        .await;

        match result {
            Ok(Some(listing)) => {
                if let Err(err) = self
                    .notifier
                    .notify_seller_sold(listing.seller_id(), listing.title(), label_url)
                    .await
                {
                    tracing::warn!(line_item_id = %item_id, error = %err, "Sold notification failed");
                }
            }
            Ok(None) => tracing::warn!(line_item_id = %item_id, "Listing missing, sold notification skipped"),
            Err(err) => tracing::warn!(line_item_id = %item_id, error = %err, "Sold notification skipped"),
        }
    }

    /// Folds a tracker update into the shipment's tracker.
    ///
    /// Updates not newer than the stored tracker are dropped. A newer one
    /// advances the shipment status. Delivery marks the listing shipped and
    /// leaves the line item where it is; any other movement moves the line
    /// item to `in_transit`. A received line item is left alone.
    #[tracing::instrument(skip(self, shipment, update), fields(shipment_id = %shipment.id()))]
    pub async fn merge_tracker(
        &self,
        shipment: &Shipment,
        update: TrackerUpdate,
    ) -> Result<TrackerMerge> {
        let mut attempt = 0;
        loop {
            match self.try_merge_tracker(shipment, update.clone()).await {
                Ok(outcome) => {
                    metrics::counter!("fulfillment_tracker_merges_total", "outcome" => outcome_label(outcome))
                        .increment(1);
                    return Ok(outcome);
                }
                Err(err) if err.is_conflict() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_merge_tracker(
        &self,
        shipment: &Shipment,
        update: TrackerUpdate,
    ) -> Result<TrackerMerge> {
        let now = Utc::now();
        let existing = self.store.tracker_for_shipment(shipment.id()).await?;
        let (tracker, outcome) = ShipmentTracker::upsert(existing, shipment.id(), update, now);
        if !outcome.is_change() {
            tracing::debug!("Stale tracker update dropped");
            return Ok(outcome);
        }

        let mut unit = UnitOfWork::new();
        let mut shipment = self
            .store
            .get_shipment(shipment.id())
            .await?
            .unwrap_or_else(|| shipment.clone());
        if let Some(status) = tracker.shipment_status()
            && let Some(change) = shipment.advance(status, now)
        {
            unit = unit.record(&shipment, change).with_shipment(shipment.clone());
        }

        if let Some(item_id) = shipment.line_item_id()
            && let Some(mut item) = self.store.get_line_item(item_id).await?
            && item.status() != LineItemStatus::Received
        {
            if tracker.is_delivered() {
                if let Some(mut listing) = self.store.get_listing(item.listing_id()).await?
                    && let Some(change) = listing.mark_shipped(now)
                {
                    unit = unit.record(&listing, change).with_listing(listing);
                }
            } else if tracker.shows_movement() && item.status().can_move_in_transit() {
                let guards = TransitionGuards::with_shipment(shipment.facts());
                match item.apply(&LineItemCommand::MoveInTransit, &guards, now) {
                    Ok(change) => unit = unit.record(&item, change).with_line_item(item.clone()),
                    Err(err) => tracing::warn!(line_item_id = %item_id, error = %err, "Transit not recorded"),
                }
            }
        }

        self.store.commit(unit.with_tracker(tracker)).await?;
        Ok(outcome)
    }
}

/// The transition a purchased label implies for its owning item.
///
/// An item waiting on the label moves to `label_printed`. So does one the
/// label reached late, after a timed out run left it `active` or
/// `ready_to_ship`.
pub(crate) fn label_command(item: &LineItem, shipment: &Shipment) -> Option<LineItemCommand> {
    if shipment.label_url().is_none() || shipment.line_item_id() != Some(item.id()) {
        return None;
    }
    match item.status() {
        LineItemStatus::LabelPending => Some(LineItemCommand::LabelPrinted),
        status if status.can_print_label() => Some(LineItemCommand::PrintLabel),
        _ => None,
    }
}

fn outcome_label(outcome: TrackerMerge) -> &'static str {
    match outcome {
        TrackerMerge::Created => "created",
        TrackerMerge::Updated => "updated",
        TrackerMerge::Stale => "stale",
    }
}
