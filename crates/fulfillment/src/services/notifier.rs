//! Seller and buyer notifications.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::UserId;

use crate::error::FulfillmentError;

/// A message sent to a marketplace user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The seller's item sold and its label is ready.
    Sold {
        seller: UserId,
        listing_title: String,
        label_url: String,
    },
    /// The buyer's item was canceled.
    Canceled {
        buyer: UserId,
        listing_title: String,
        reason: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_seller_sold(
        &self,
        seller: UserId,
        listing_title: &str,
        label_url: &str,
    ) -> Result<(), FulfillmentError>;

    async fn notify_buyer_canceled(
        &self,
        buyer: UserId,
        listing_title: &str,
        reason: &str,
    ) -> Result<(), FulfillmentError>;
}

/// Notifier that only writes log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_seller_sold(
        &self,
        seller: UserId,
        listing_title: &str,
        label_url: &str,
    ) -> Result<(), FulfillmentError> {
        tracing::info!(%seller, listing_title, label_url, "Sold notification");
        Ok(())
    }

    async fn notify_buyer_canceled(
        &self,
        buyer: UserId,
        listing_title: &str,
        reason: &str,
    ) -> Result<(), FulfillmentError> {
        tracing::info!(%buyer, listing_title, reason, "Cancellation notification");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }

    /// All notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    pub fn sold_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|n| matches!(n, Notification::Sold { .. }))
            .count()
    }

    pub fn canceled_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|n| matches!(n, Notification::Canceled { .. }))
            .count()
    }

    fn deliver(&self, notification: Notification) -> Result<(), FulfillmentError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(FulfillmentError::Notification(
                "push service unavailable".to_string(),
            ));
        }
        state.sent.push(notification);
        Ok(())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify_seller_sold(
        &self,
        seller: UserId,
        listing_title: &str,
        label_url: &str,
    ) -> Result<(), FulfillmentError> {
        self.deliver(Notification::Sold {
            seller,
            listing_title: listing_title.to_string(),
            label_url: label_url.to_string(),
        })
    }

    async fn notify_buyer_canceled(
        &self,
        buyer: UserId,
        listing_title: &str,
        reason: &str,
    ) -> Result<(), FulfillmentError> {
        self.deliver(Notification::Canceled {
            buyer,
            listing_title: listing_title.to_string(),
            reason: reason.to_string(),
        })
    }
}
