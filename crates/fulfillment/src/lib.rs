//! Order fulfillment workflows.
//!
//! This crate drives line items from a confirmed sale to delivery:
//! 1. A scheduled batch run buys postage for every item ready to ship
//! 2. Carrier webhooks and a polling job keep shipments and trackers current
//! 3. Cancellation refunds the label and the buyer, queuing what fails
//!
//! External systems (carrier, payment, notifications) sit behind traits in
//! [`services`], each with an in-memory implementation for tests.

mod access;
pub mod batch;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod handler;
pub mod line_items;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod sync;

pub use batch::{BatchPipeline, BatchRunReport};
pub use cancellation::{CancellationReport, CancellationService, StepOutcome};
pub use config::FulfillmentConfig;
pub use error::{FulfillmentError, Result};
pub use handler::LineItemHandler;
pub use line_items::{LineItemService, ReceiptCheck};
pub use reconcile::{EventOutcome, PollReport, Reconciler};
pub use retry::{RetryPolicy, SettlePolicy};
pub use scheduler::{ReconciliationJob, ScheduledJob, spawn_periodic};
pub use services::{
    CarrierError, CarrierEvent, CarrierGateway, InMemoryNotifier, InMemoryPaymentGateway,
    Notification, Notifier, PaymentGateway, PaymentRefund, TracingNotifier,
};
pub use sync::{MergeOutcome, ShipmentSync};
