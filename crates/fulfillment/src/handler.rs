//! Load-apply-commit for line item transitions.

use chrono::Utc;
use common::LineItemId;
use domain::{LineItem, LineItemCommand, Shipment, TransitionGuards};
use fulfillment_store::{FulfillmentStore, UnitOfWork};

use crate::error::{FulfillmentError, Result};

/// Runs line item commands against the store.
///
/// Each command is applied to a freshly loaded item with the guard facts of
/// its shipment, then committed with optimistic concurrency. When the guard
/// reads the shipment, the shipment joins the commit at the version that
/// was read. A concurrency conflict reloads both and re-runs the guard, so
/// a command never overwrites a transition it did not see.
#[derive(Debug, Clone)]
pub struct LineItemHandler<S> {
    store: S,
    max_attempts: u32,
}

impl<S: FulfillmentStore> LineItemHandler<S> {
    /// Creates a handler that tries a conflicting commit up to
    /// `max_attempts` times.
    pub fn new(store: S, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads a line item and the guard facts of its shipment.
    pub async fn load(&self, id: LineItemId) -> Result<(LineItem, TransitionGuards)> {
        let (item, shipment) = self.load_with_shipment(id).await?;
        Ok((item, guards_for(shipment.as_ref())))
    }

    async fn load_with_shipment(&self, id: LineItemId) -> Result<(LineItem, Option<Shipment>)> {
        let item = self
            .store
            .get_line_item(id)
            .await?
            .ok_or(FulfillmentError::LineItemNotFound(id))?;
        let shipment = self.store.shipment_for_line_item(id).await?;
        Ok((item, shipment))
    }

    /// Applies a command to freshly loaded state and builds the unit to
    /// commit.
    async fn prepare(
        &self,
        id: LineItemId,
        command: &LineItemCommand,
    ) -> Result<(LineItem, UnitOfWork)> {
        let (mut item, shipment) = self.load_with_shipment(id).await?;
        let change = item.apply(command, &guards_for(shipment.as_ref()), Utc::now())?;
        let mut unit = UnitOfWork::new()
            .record(&item, change)
            .with_line_item(item.clone());
        if command.reads_shipment()
            && let Some(shipment) = shipment
        {
            unit = unit.with_shipment(shipment);
        }
        Ok((item, unit))
    }

    /// Applies a command and commits the result.
    pub async fn execute(&self, id: LineItemId, command: LineItemCommand) -> Result<LineItem> {
        let mut attempt = 0;
        loop {
            let (item, unit) = self.prepare(id, &command).await?;

            match self.store.commit(unit).await {
                Ok(mut committed) => {
                    metrics::counter!(
                        "fulfillment_line_item_transitions_total",
                        "action" => command.action()
                    )
                    .increment(1);
                    return Ok(committed.line_items.pop().unwrap_or(item));
                }
                Err(err) if err.is_conflict() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    tracing::debug!(line_item_id = %id, attempt, "Conflict, reloading line item");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Changes non-status fields of a line item.
    pub async fn update<F>(&self, id: LineItemId, change: F) -> Result<LineItem>
    where
        F: Fn(&mut LineItem),
    {
        let mut attempt = 0;
        loop {
            let (mut item, _) = self.load(id).await?;
            change(&mut item);
            match self
                .store
                .commit(UnitOfWork::new().with_line_item(item.clone()))
                .await
            {
                Ok(mut committed) => return Ok(committed.line_items.pop().unwrap_or(item)),
                Err(err) if err.is_conflict() && attempt + 1 < self.max_attempts => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Records a failed label purchase.
    ///
    /// Never fails: a rejected transition (the item moved on, e.g. it was
    /// canceled) or a store error is logged and `None` returned.
    pub async fn fail_label(&self, id: LineItemId, reason: &str) -> Option<LineItem> {
        let command = LineItemCommand::FailedToPrintLabel {
            reason: reason.to_string(),
        };
        match self.execute(id, command).await {
            Ok(item) => {
                tracing::warn!(line_item_id = %id, reason, "Label purchase failed");
                metrics::counter!("fulfillment_label_failures_total").increment(1);
                Some(item)
            }
            Err(FulfillmentError::Guard(err)) => {
                tracing::warn!(line_item_id = %id, reason, error = %err, "Label failure not recorded");
                None
            }
            Err(err) => {
                tracing::error!(line_item_id = %id, reason, error = %err, "Could not record label failure");
                None
            }
        }
    }
}

fn guards_for(shipment: Option<&Shipment>) -> TransitionGuards {
    match shipment {
        Some(shipment) => TransitionGuards::with_shipment(shipment.facts()),
        None => TransitionGuards::default(),
    }
}
