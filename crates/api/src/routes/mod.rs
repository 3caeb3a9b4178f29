pub mod health;
pub mod line_items;
pub mod metrics;
pub mod webhooks;
