//! Server Configuration

use std::env;
use std::time::Duration;

/// Default seQura settlement poll interval (one hour)
const DEFAULT_SETTLEMENT_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Shared secret for seQura IPN signatures; seQura webhooks are disabled without it
    pub sequra_webhook_secret: Option<String>,
    pub settlement_interval: Duration,
    /// Email of the admin agent created on first start
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let settlement_secs = env::var("SETTLEMENT_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SETTLEMENT_INTERVAL_SECS);

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            sequra_webhook_secret: env::var("SEQURA_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            settlement_interval: Duration::from_secs(settlement_secs),
            bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok().filter(|s| !s.is_empty()),
        }
    }
}
