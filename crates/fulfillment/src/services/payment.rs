//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::Money;

use crate::error::FulfillmentError;

/// A refund accepted by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRefund {
    pub refund_id: String,
    pub payment_reference: String,
    pub amount: Money,
}

/// Trait for refunding buyers.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Refunds part of a payment.
    ///
    /// Calls with the same `idempotency_key` refund at most once and return
    /// the original refund.
    async fn refund(
        &self,
        payment_reference: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentRefund, FulfillmentError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    refunds: HashMap<String, PaymentRefund>,
    next_id: u32,
    fail_on_refund: bool,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to decline refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_refund = fail;
    }

    /// Returns the number of refunds issued.
    pub fn refund_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refunds
            .len()
    }

    /// Total refunded against a payment.
    pub fn refunded_amount(&self, payment_reference: &str) -> Money {
        let cents = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refunds
            .values()
            .filter(|r| r.payment_reference == payment_reference)
            .map(|r| r.amount.cents())
            .sum();
        Money::from_cents(cents)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn refund(
        &self,
        payment_reference: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentRefund, FulfillmentError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_refund {
            return Err(FulfillmentError::Payment("Refund declined".to_string()));
        }
        if let Some(existing) = state.refunds.get(idempotency_key) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let refund = PaymentRefund {
            refund_id: format!("re_{}", state.next_id),
            payment_reference: payment_reference.to_string(),
            amount,
        };
        state
            .refunds
            .insert(idempotency_key.to_string(), refund.clone());
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refund_is_idempotent_per_key() {
        let gateway = InMemoryPaymentGateway::new();

        let first = gateway
            .refund("pi_1", Money::from_cents(1500), "cancel-1")
            .await
            .unwrap();
        let second = gateway
            .refund("pi_1", Money::from_cents(1500), "cancel-1")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.refund_count(), 1);
        assert_eq!(gateway.refunded_amount("pi_1"), Money::from_cents(1500));
    }

    #[tokio::test]
    async fn test_declined_refund() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_refund(true);

        let result = gateway.refund("pi_1", Money::from_cents(100), "k").await;
        assert!(matches!(result, Err(FulfillmentError::Payment(_))));
        assert_eq!(gateway.refund_count(), 0);
    }
}
