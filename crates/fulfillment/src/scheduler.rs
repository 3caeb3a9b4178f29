//! Periodic background jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fulfillment_store::FulfillmentStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::batch::BatchPipeline;
use crate::cancellation::CancellationService;
use crate::error::{FulfillmentError, Result};
use crate::reconcile::Reconciler;
use crate::services::carrier::CarrierGateway;
use crate::services::{Notifier, PaymentGateway};

/// A job run on a fixed cadence.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<()>;
}

#[async_trait]
impl<S, C, N> ScheduledJob for BatchPipeline<S, C, N>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    N: Notifier + 'static,
{
    fn name(&self) -> &'static str {
        "batch_submission"
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

/// Polls in-flight shipments, then retries queued cancellation side
/// effects.
pub struct ReconciliationJob<S, C, P, N> {
    reconciler: Arc<Reconciler<S, C, N>>,
    cancellation: Arc<CancellationService<S, C, P, N>>,
}

impl<S, C, P, N> ReconciliationJob<S, C, P, N> {
    pub fn new(
        reconciler: Arc<Reconciler<S, C, N>>,
        cancellation: Arc<CancellationService<S, C, P, N>>,
    ) -> Self {
        Self {
            reconciler,
            cancellation,
        }
    }
}

#[async_trait]
impl<S, C, P, N> ScheduledJob for ReconciliationJob<S, C, P, N>
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn run_once(&self) -> Result<()> {
        self.reconciler.poll().await?;
        let resolved = self.cancellation.retry_pending_compensations().await?;
        if resolved > 0 {
            tracing::info!(resolved, "Compensations resolved");
        }
        Ok(())
    }
}

/// Runs `job` every `period` until `shutdown` flips to true.
///
/// A run that outlasts the period delays the next one instead of stacking
/// up. Errors are logged; the loop keeps going.
pub fn spawn_periodic<J: ScheduledJob>(
    job: Arc<J>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(job = job.name(), period_secs = period.as_secs(), "Scheduled job started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match job.run_once().await {
                Ok(()) => {}
                Err(FulfillmentError::LeaseHeld(lease)) => {
                    tracing::debug!(job = job.name(), lease, "Skipped, another run holds the lease");
                }
                Err(err) => tracing::error!(job = job.name(), error = %err, "Scheduled job failed"),
            }
        }
        tracing::info!(job = job.name(), "Scheduled job stopped");
    })
}
