//! Persistence for the fulfillment entities.
//!
//! All writes go through [`FulfillmentStore::commit`], which applies a
//! [`UnitOfWork`] atomically: every entity in it is version-checked, and the
//! transition history is appended in the same transaction.

pub mod error;
pub mod history;
pub mod lease;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use history::TransitionRecord;
pub use lease::Lease;
pub use memory::InMemoryFulfillmentStore;
pub use postgres::PostgresFulfillmentStore;
pub use store::{FulfillmentStore, FulfillmentStoreExt, UnitOfWork};
