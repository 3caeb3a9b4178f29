//! Shared application state.

use std::sync::Arc;

use fulfillment::{
    BatchPipeline, CancellationService, CarrierGateway, FulfillmentConfig, LineItemService,
    Notifier, PaymentGateway, Reconciler,
};
use fulfillment_store::FulfillmentStore;

/// Services reachable from every handler.
///
/// The pipeline, reconciler and cancellation service are shared with the
/// scheduled jobs, so they sit behind `Arc`s.
pub struct AppState<S, C, P, N> {
    pub line_items: LineItemService<S>,
    pub pipeline: Arc<BatchPipeline<S, C, N>>,
    pub cancellation: Arc<CancellationService<S, C, P, N>>,
    pub reconciler: Arc<Reconciler<S, C, N>>,
    /// Secret carrier webhooks are signed with. Unsigned webhooks are
    /// accepted when unset.
    pub webhook_secret: Option<String>,
}

impl<S, C, P, N> AppState<S, C, P, N>
where
    S: FulfillmentStore + Clone,
    C: CarrierGateway + Clone,
    P: PaymentGateway,
    N: Notifier + Clone,
{
    pub fn new(
        store: S,
        carrier: C,
        payment: P,
        notifier: N,
        config: &FulfillmentConfig,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            line_items: LineItemService::new(store.clone(), config),
            pipeline: Arc::new(BatchPipeline::new(
                store.clone(),
                carrier.clone(),
                notifier.clone(),
                config,
            )),
            reconciler: Arc::new(Reconciler::new(
                store.clone(),
                carrier.clone(),
                notifier.clone(),
                config,
            )),
            cancellation: Arc::new(CancellationService::new(
                store, carrier, payment, notifier, config,
            )),
            webhook_secret,
        }
    }
}
