//! HTTP API server for line item fulfillment.
//!
//! Exposes the carrier webhook endpoint and the seller/buyer line item
//! operations, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{CarrierGateway, Notifier, PaymentGateway};
use fulfillment_store::FulfillmentStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C, P, N>(
    state: Arc<AppState<S, C, P, N>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + 'static,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    use routes::line_items;

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/webhooks/carrier",
            post(routes::webhooks::carrier::<S, C, P, N>),
        )
        .route("/line-items/{id}", get(line_items::get::<S, C, P, N>))
        .route(
            "/line-items/{id}/confirm-to-ship",
            post(line_items::confirm_to_ship::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/label",
            post(line_items::purchase_label::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/cancel",
            post(line_items::cancel::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/pickup",
            post(line_items::create_pickup::<S, C, P, N>)
                .delete(line_items::cancel_pickup::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/receive",
            post(line_items::receive::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/receivable",
            get(line_items::receivable::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/return",
            post(line_items::start_return::<S, C, P, N>),
        )
        .route(
            "/line-items/{id}/history",
            get(line_items::history::<S, C, P, N>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
