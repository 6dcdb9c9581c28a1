//! TOML file configuration structures.
//!
//! These structs directly map to the `haulage-config.toml` file format.
//! Durations are whole seconds unless the field name says otherwise.

use haulage_core::entities::PricingConfiguration;
use serde::Deserialize;
use std::net::SocketAddr;
use time::Date;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

/// Dispatch section. Every field is optional; missing ones keep the engine
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    pub offer_timeout_secs: Option<u64>,
    pub max_candidates: Option<usize>,
    pub max_offer_distance_km: Option<f64>,
    pub max_active_jobs: Option<u32>,
    pub expiry_sweep_interval_secs: Option<u64>,
    pub auto_assign_delay_secs: Option<u64>,
    pub rebalance_threshold: Option<usize>,
    pub rebalance_keep: Option<usize>,
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Base URL of the payment processor API.
    pub base_url: url::Url,
    pub secret_key: String,
    /// Secret for the `Haulage-Signature` header on inbound webhooks.
    pub webhook_secret: Option<String>,
    pub currency: Option<String>,
    pub stuck_after_secs: Option<u64>,
    pub poll_base_delay_secs: Option<u64>,
    pub poll_max_attempts: Option<u32>,
    pub poll_cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcilerConfig {
    pub interval_secs: Option<u64>,
    pub window_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingConfig {
    /// Local business time as an offset from UTC, in hours.
    #[serde(default)]
    pub timezone_offset_hours: i8,
    #[serde(default)]
    pub holidays: Vec<Date>,
    /// Published as the active configuration on startup and on every reload.
    pub default: Option<PricingConfiguration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherConfig {
    /// Without a base URL every day is priced as normal weather.
    pub base_url: Option<url::Url>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    /// Without a webhook URL notifications are only logged.
    pub webhook_url: Option<url::Url>,
    pub webhook_secret: Option<String>,
    pub per_user_per_hour: Option<u32>,
    pub global_per_hour: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use haulage_core::entities::PricingFactor;
    use rust_decimal::Decimal;
    use time::macros::date;

    #[test]
    fn test_minimal_config_parsing() {
        let toml_str = r#"
[payments]
base_url = "https://api.paystack.co/"
secret_key = "sk_test_123"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.dispatch.max_candidates.is_none());
        assert!(config.pricing.default.is_none());
        assert!(config.weather.base_url.is_none());
    }

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[database]
max_connections = 4

[dispatch]
offer_timeout_secs = 120
max_candidates = 3
max_offer_distance_km = 15.5

[payments]
base_url = "https://api.paystack.co/"
secret_key = "sk_test_123"
webhook_secret = "whsec"
currency = "GHS"
poll_max_attempts = 7

[reconciler]
interval_secs = 60
window_days = 3

[pricing]
timezone_offset_hours = 1
holidays = ["2026-12-25", "2026-12-26"]

[pricing.default]
name = "Accra standard"
base_price = "50.00"
min_price = "30.00"
max_price_multiplier = "3"
platform_fee_percentage = "15"

[[pricing.default.factors]]
name = "distance"
kind = "distance"
base_rate_per_km = "2.5"
additional_distance_threshold = "50"
additional_distance_multiplier = "1.5"

[[pricing.default.factors]]
name = "weekend"
kind = "time"
active = false
weekend_multiplier = "1.2"
holiday_multiplier = "1.5"

[notifications]
webhook_url = "https://hooks.example.com/haulage"
webhook_secret = "nsec"
per_user_per_hour = 10
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.dispatch.offer_timeout_secs, Some(120));
        assert_eq!(config.dispatch.max_offer_distance_km, Some(15.5));
        assert_eq!(config.payments.poll_max_attempts, Some(7));
        assert_eq!(config.reconciler.window_days, Some(3));
        assert_eq!(
            config.pricing.holidays,
            vec![date!(2026 - 12 - 25), date!(2026 - 12 - 26)]
        );

        let pricing = config.pricing.default.unwrap();
        assert_eq!(pricing.base_price, Decimal::new(5000, 2));
        assert_eq!(pricing.factors.len(), 2);
        assert!(pricing.factors[0].active);
        assert!(!pricing.factors[1].active);
        assert!(matches!(
            pricing.factors[0].factor,
            PricingFactor::Distance { .. }
        ));
        assert_eq!(config.notifications.per_user_per_hour, Some(10));
        assert!(config.notifications.global_per_hour.is_none());
    }

    #[test]
    fn test_missing_payments_section_is_an_error() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"
"#;
        assert!(toml::from_str::<FileConfig>(toml_str).is_err());
    }
}
