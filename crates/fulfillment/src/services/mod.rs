//! External service interfaces used by the fulfillment workflows.
//!
//! Each service is a trait with an in-memory implementation for tests.

pub mod carrier;
pub mod notifier;
pub mod payment;

pub use carrier::{CarrierError, CarrierEvent, CarrierGateway};
pub use notifier::{InMemoryNotifier, Notification, Notifier, TracingNotifier};
pub use payment::{InMemoryPaymentGateway, PaymentGateway, PaymentRefund};
