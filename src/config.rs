//! Environment-driven configuration.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub exchange: String,
    /// Upper bound on a publish confirm before the attempt fails fast.
    pub publish_timeout: Duration,
    /// Redelivery ceiling before a message is routed to the dead-letter queue.
    pub max_delivery_attempts: u32,
    pub alert_scan_interval: Duration,
    pub low_stock_threshold: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            service_name: env_or("SERVICE_NAME", "orderflow"),
            port: parsed_env("PORT", 8083),
            database_url: std::env::var("DATABASE_URL").ok(),
            nats_url: std::env::var("NATS_URL").ok(),
            exchange: env_or("EXCHANGE", "ecommerce"),
            publish_timeout: Duration::from_millis(parsed_env("PUBLISH_TIMEOUT_MS", 5_000)),
            max_delivery_attempts: parsed_env("MAX_DELIVERY_ATTEMPTS", 5),
            alert_scan_interval: Duration::from_secs(parsed_env("ALERT_SCAN_INTERVAL_SECS", 60)),
            low_stock_threshold: parsed_env("LOW_STOCK_THRESHOLD", 10),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
