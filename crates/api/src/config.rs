//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use fulfillment::FulfillmentConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `CARRIER_API_KEY` / `CARRIER_BASE_URL`: carrier REST API; the
///   in-memory carrier is used when the key is unset
/// - `CARRIER_WEBHOOK_SECRET`: HMAC secret for webhook signatures
/// - `REFUND_GRACE_DAYS`: label age before refunds are attempted (default: `15`)
/// - `FULFILLMENT_TEST_MODE`: skip the refund grace period (default: `false`)
/// - `BATCH_INTERVAL_SECS`: batch submission cadence (default: `60`)
/// - `RECONCILE_INTERVAL_SECS`: polling and compensation cadence (default: `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub carrier_api_key: Option<String>,
    pub carrier_base_url: String,
    pub webhook_secret: Option<String>,
    pub refund_grace_days: i64,
    pub test_mode: bool,
    pub batch_interval: Duration,
    pub reconcile_interval: Duration,
}

pub const DEFAULT_CARRIER_BASE_URL: &str = "https://api.easypost.com/v2";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse(non_empty("PORT")).unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            carrier_api_key: non_empty("CARRIER_API_KEY"),
            carrier_base_url: non_empty("CARRIER_BASE_URL").unwrap_or(defaults.carrier_base_url),
            webhook_secret: non_empty("CARRIER_WEBHOOK_SECRET"),
            refund_grace_days: parse(non_empty("REFUND_GRACE_DAYS")).unwrap_or(defaults.refund_grace_days),
            test_mode: non_empty("FULFILLMENT_TEST_MODE")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.test_mode),
            batch_interval: parse(non_empty("BATCH_INTERVAL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.batch_interval),
            reconcile_interval: parse(non_empty("RECONCILE_INTERVAL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fulfillment settings derived from this configuration.
    pub fn fulfillment(&self) -> FulfillmentConfig {
        FulfillmentConfig {
            refund_grace_days: self.refund_grace_days,
            test_mode: self.test_mode,
            ..FulfillmentConfig::default()
        }
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            carrier_api_key: None,
            carrier_base_url: DEFAULT_CARRIER_BASE_URL.to_string(),
            webhook_secret: None,
            refund_grace_days: 15,
            test_mode: false,
            batch_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}
