//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use fulfillment::services::carrier::{
    HttpCarrierGateway, InMemoryCarrierGateway, RetryingCarrierGateway,
};
use fulfillment::{
    CarrierGateway, InMemoryPaymentGateway, ReconciliationJob, TracingNotifier, spawn_periodic,
};
use fulfillment_store::{FulfillmentStore, InMemoryFulfillmentStore, PostgresFulfillmentStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if config.webhook_secret.is_none() {
        tracing::warn!("CARRIER_WEBHOOK_SECRET is not set, webhook signatures are not checked");
    }

    // 3. Pick the store and carrier, then run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresFulfillmentStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            with_carrier(config, store, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL is not set, using in-memory store");
            with_carrier(config, InMemoryFulfillmentStore::new(), metrics_handle).await;
        }
    }
}

async fn with_carrier<S>(config: Config, store: S, metrics_handle: PrometheusHandle)
where
    S: FulfillmentStore + Clone + 'static,
{
    match config.carrier_api_key.clone() {
        Some(api_key) => {
            let http = HttpCarrierGateway::new(config.carrier_base_url.as_str(), api_key)
                .expect("failed to build carrier client");
            let carrier = RetryingCarrierGateway::new(http, config.fulfillment().carrier_retry);
            tracing::info!(base_url = %config.carrier_base_url, "using carrier API");
            run(config, store, carrier, metrics_handle).await;
        }
        None => {
            tracing::info!("CARRIER_API_KEY is not set, using in-memory carrier");
            run(config, store, InMemoryCarrierGateway::new(), metrics_handle).await;
        }
    }
}

async fn run<S, C>(config: Config, store: S, carrier: C, metrics_handle: PrometheusHandle)
where
    S: FulfillmentStore + Clone + 'static,
    C: CarrierGateway + Clone + 'static,
{
    let fulfillment_config = config.fulfillment();
    fulfillment_config
        .validate()
        .expect("invalid fulfillment configuration");
    let notifier = TracingNotifier;

    // 4. Build services and start the scheduled jobs
    let state = Arc::new(AppState::new(
        store,
        carrier,
        InMemoryPaymentGateway::new(),
        notifier,
        &fulfillment_config,
        config.webhook_secret.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationJob::new(
        state.reconciler.clone(),
        state.cancellation.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = [
        spawn_periodic(state.pipeline.clone(), config.batch_interval, shutdown_rx.clone()),
        spawn_periodic(reconciliation, config.reconcile_interval, shutdown_rx),
    ];

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Let in-flight job runs finish
    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(err) = job.await {
            tracing::error!(error = %err, "scheduled job panicked");
        }
    }

    tracing::info!("server shut down gracefully");
}
