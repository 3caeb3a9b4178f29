//! Who may act on a line item.

use common::{LineItemId, UserId};
use domain::{LineItem, Listing, Order};
use fulfillment_store::{FulfillmentStore, FulfillmentStoreExt};

use crate::error::{FulfillmentError, Result};

/// A line item together with the order and listing that name its buyer and
/// seller.
#[derive(Debug, Clone)]
pub(crate) struct Parties {
    pub item: LineItem,
    pub order: Order,
    pub listing: Listing,
}

impl Parties {
    pub async fn load<S: FulfillmentStore>(store: &S, id: LineItemId) -> Result<Self> {
        let item = store
            .get_line_item(id)
            .await?
            .ok_or(FulfillmentError::LineItemNotFound(id))?;
        let order = store.require_order(item.order_id()).await?;
        let listing = store.require_listing(item.listing_id()).await?;
        Ok(Self {
            item,
            order,
            listing,
        })
    }

    pub fn is_seller(&self, actor: UserId) -> bool {
        self.listing.seller_id() == actor
    }

    pub fn is_buyer(&self, actor: UserId) -> bool {
        self.order.buyer_id() == actor
    }

    pub fn require_seller(&self, actor: UserId) -> Result<()> {
        if self.is_seller(actor) {
            return Ok(());
        }
        Err(FulfillmentError::NotPermitted(
            "only the seller may do this".to_string(),
        ))
    }

    pub fn require_buyer(&self, actor: UserId) -> Result<()> {
        if self.is_buyer(actor) {
            return Ok(());
        }
        Err(FulfillmentError::NotPermitted(
            "only the buyer may do this".to_string(),
        ))
    }

    pub fn require_party(&self, actor: UserId) -> Result<()> {
        if self.is_seller(actor) || self.is_buyer(actor) {
            return Ok(());
        }
        Err(FulfillmentError::NotPermitted(
            "not a party to this order".to_string(),
        ))
    }
}
