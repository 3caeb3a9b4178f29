//! Seller and buyer operations on a single line item.

use common::{LineItemId, UserId};
use domain::{LineItem, LineItemCommand, ReceiptBlocker};
use fulfillment_store::{FulfillmentStore, TransitionRecord};
use serde::Serialize;

use crate::access::Parties;
use crate::config::FulfillmentConfig;
use crate::error::Result;
use crate::handler::LineItemHandler;

/// Advisory answer to "can the buyer confirm receipt?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptCheck {
    pub receivable: bool,
    pub blockers: Vec<ReceiptBlocker>,
}

/// Line item operations requested by the seller or buyer.
pub struct LineItemService<S> {
    store: S,
    handler: LineItemHandler<S>,
}

impl<S: FulfillmentStore + Clone> LineItemService<S> {
    pub fn new(store: S, config: &FulfillmentConfig) -> Self {
        Self {
            handler: LineItemHandler::new(store.clone(), config.conflict_retries),
            store,
        }
    }

    /// Reads a line item visible to its buyer or seller.
    pub async fn get(&self, id: LineItemId, actor: UserId) -> Result<LineItem> {
        let parties = Parties::load(&self.store, id).await?;
        parties.require_party(actor)?;
        Ok(parties.item)
    }

    /// The seller confirms the item can ship; it joins the next batch.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_to_ship(&self, id: LineItemId, actor: UserId) -> Result<LineItem> {
        Parties::load(&self.store, id).await?.require_seller(actor)?;
        let item = self.handler.execute(id, LineItemCommand::ConfirmToShip).await?;
        tracing::info!(line_item_id = %id, "Line item confirmed to ship");
        Ok(item)
    }

    /// The buyer confirms the item arrived.
    #[tracing::instrument(skip(self))]
    pub async fn receive(&self, id: LineItemId, actor: UserId) -> Result<LineItem> {
        Parties::load(&self.store, id).await?.require_buyer(actor)?;
        let item = self.handler.execute(id, LineItemCommand::Receive).await?;
        tracing::info!(line_item_id = %id, "Line item received");
        Ok(item)
    }

    /// The buyer sends a shipped item back.
    #[tracing::instrument(skip(self))]
    pub async fn start_return(&self, id: LineItemId, actor: UserId) -> Result<LineItem> {
        Parties::load(&self.store, id).await?.require_buyer(actor)?;
        self.handler.execute(id, LineItemCommand::StartReturn).await
    }

    /// Lists what keeps the buyer from confirming receipt.
    pub async fn check_receivable(&self, id: LineItemId, actor: UserId) -> Result<ReceiptCheck> {
        let parties = Parties::load(&self.store, id).await?;
        parties.require_party(actor)?;
        let has_shipment = self.store.shipment_for_line_item(id).await?.is_some();
        let blockers = parties
            .item
            .receipt_blockers(&parties.order, &parties.listing, has_shipment);
        Ok(ReceiptCheck {
            receivable: blockers.is_empty(),
            blockers,
        })
    }

    /// Status changes of the line item, oldest first.
    pub async fn history(&self, id: LineItemId, actor: UserId) -> Result<Vec<TransitionRecord>> {
        Parties::load(&self.store, id).await?.require_party(actor)?;
        Ok(self.store.history(id.as_uuid()).await?)
    }
}
