//! Tunables for the fulfillment workflows.

use std::time::Duration;

use domain::RefundPolicy;

use crate::error::{FulfillmentError, Result};
use crate::retry::{RetryPolicy, SettlePolicy};

/// Time a batch run needs on top of its two settlement waits.
pub const LEASE_MARGIN: Duration = Duration::from_secs(60);

/// Runtime settings shared by the fulfillment services.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    /// Days a generated label must age before it may be refunded.
    pub refund_grace_days: i64,
    /// Skips the refund grace period.
    pub test_mode: bool,
    /// How long to wait for a carrier batch to settle.
    pub settle: SettlePolicy,
    /// Retries for idempotent carrier reads.
    pub carrier_retry: RetryPolicy,
    /// How long a job lease is held before others may take it over.
    pub lease_ttl: Duration,
    /// Reload-and-retry attempts on a concurrency conflict.
    pub conflict_retries: u32,
}

impl FulfillmentConfig {
    pub fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy::new(self.refund_grace_days, self.test_mode)
    }

    /// Lease lifetime as a chrono duration, as the store expects it.
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_ttl).unwrap_or(chrono::Duration::minutes(15))
    }

    /// Checks that a batch run cannot outlive its lease.
    ///
    /// A run waits up to `settle.timeout` for the batch to become buyable and
    /// again for the purchase to settle, so the lease must cover both waits
    /// plus [`LEASE_MARGIN`].
    pub fn validate(&self) -> Result<()> {
        let needed = self.settle.timeout * 2 + LEASE_MARGIN;
        if self.lease_ttl < needed {
            return Err(FulfillmentError::InvalidConfig(format!(
                "lease_ttl ({}s) must be at least twice the settle timeout plus {}s ({}s)",
                self.lease_ttl.as_secs(),
                LEASE_MARGIN.as_secs(),
                needed.as_secs()
            )));
        }
        if self.conflict_retries == 0 {
            return Err(FulfillmentError::InvalidConfig(
                "conflict_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            refund_grace_days: RefundPolicy::DEFAULT_GRACE_DAYS,
            test_mode: false,
            settle: SettlePolicy::default(),
            carrier_retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(900),
            conflict_retries: 3,
        }
    }
}
