//! Runtime configuration built from the file.
//!
//! Engine-facing settings are the plain structs from `haulage_core::config`;
//! this module fills them from a [`FileConfig`], keeping core defaults for
//! anything the file leaves out.

use std::net::SocketAddr;
use std::time::Duration;

use haulage_core::config::{
    DispatchSettings, EngineSettings, LockSettings, NotificationSettings, PaymentSettings,
    ReconcilerSettings,
};
use haulage_core::pricing::{HolidayCalendar, PricingState};
use haulage_core::rate_limit::BucketSpec;
use time::UtcOffset;

use crate::config::ConfigError;
use crate::config::file::{
    DispatchConfig, FileConfig, NotificationsConfig, PaymentsConfig, PricingConfig,
    ReconcilerConfig,
};

/// Where and how to reach the payment processor.
#[derive(Debug, Clone)]
pub struct PaymentOracleConfig {
    pub base_url: url::Url,
    pub secret_key: String,
}

/// Signed-webhook notifier target. `None` in [`RuntimeConfig`] means log only.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub url: url::Url,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    pub max_connections: u32,
    pub timezone: UtcOffset,
    pub engine: EngineSettings,
    pub payment_oracle: PaymentOracleConfig,
    pub pricing: PricingState,
    pub weather_base_url: Option<url::Url>,
    pub notifier: Option<NotifierConfig>,
}

impl TryFrom<FileConfig> for RuntimeConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let timezone = UtcOffset::from_hms(file.pricing.timezone_offset_hours, 0, 0)
            .map_err(|e| ConfigError::ValidationError(format!("timezone_offset_hours: {e}")))?;
        let notifier = notifier_config(&file.notifications)?;

        Ok(Self {
            listen: file.server.listen,
            max_connections: file.database.max_connections,
            timezone,
            engine: EngineSettings {
                dispatch: dispatch_settings(&file.dispatch),
                payments: payment_settings(&file.payments),
                reconciler: reconciler_settings(&file.reconciler),
                locks: lock_settings(&file.dispatch),
                notifications: notification_settings(&file.notifications),
            },
            payment_oracle: PaymentOracleConfig {
                base_url: file.payments.base_url,
                secret_key: file.payments.secret_key,
            },
            pricing: pricing_state(file.pricing),
            weather_base_url: file.weather.base_url,
            notifier,
        })
    }
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn time_secs(value: Option<u64>) -> Option<time::Duration> {
    value.map(|s| time::Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX)))
}

fn dispatch_settings(file: &DispatchConfig) -> DispatchSettings {
    let defaults = DispatchSettings::default();
    DispatchSettings {
        offer_timeout: time_secs(file.offer_timeout_secs).unwrap_or(defaults.offer_timeout),
        max_candidates: file.max_candidates.unwrap_or(defaults.max_candidates),
        max_offer_distance_km: file
            .max_offer_distance_km
            .unwrap_or(defaults.max_offer_distance_km),
        max_active_jobs: file.max_active_jobs.unwrap_or(defaults.max_active_jobs),
        expiry_sweep_interval: secs(file.expiry_sweep_interval_secs)
            .unwrap_or(defaults.expiry_sweep_interval),
        auto_assign_delay: secs(file.auto_assign_delay_secs).unwrap_or(defaults.auto_assign_delay),
        rebalance_threshold: file
            .rebalance_threshold
            .unwrap_or(defaults.rebalance_threshold),
        rebalance_keep: file.rebalance_keep.unwrap_or(defaults.rebalance_keep),
        per_km_rate: defaults.per_km_rate,
    }
}

fn lock_settings(file: &DispatchConfig) -> LockSettings {
    file.lock_timeout_ms
        .map(|ms| LockSettings {
            timeout: Duration::from_millis(ms),
        })
        .unwrap_or_default()
}

fn payment_settings(file: &PaymentsConfig) -> PaymentSettings {
    let defaults = PaymentSettings::default();
    PaymentSettings {
        currency: file.currency.clone().unwrap_or(defaults.currency),
        stuck_after: time_secs(file.stuck_after_secs).unwrap_or(defaults.stuck_after),
        poll_base_delay: secs(file.poll_base_delay_secs).unwrap_or(defaults.poll_base_delay),
        poll_max_attempts: file.poll_max_attempts.unwrap_or(defaults.poll_max_attempts),
        poll_cooldown: time_secs(file.poll_cooldown_secs).unwrap_or(defaults.poll_cooldown),
        webhook_secret: file.webhook_secret.clone(),
    }
}

fn reconciler_settings(file: &ReconcilerConfig) -> ReconcilerSettings {
    let defaults = ReconcilerSettings::default();
    ReconcilerSettings {
        interval: secs(file.interval_secs).unwrap_or(defaults.interval),
        window_days: file.window_days.unwrap_or(defaults.window_days),
    }
}

fn notification_settings(file: &NotificationsConfig) -> NotificationSettings {
    let defaults = NotificationSettings::default();
    NotificationSettings {
        per_user: file
            .per_user_per_hour
            .map(BucketSpec::per_hour)
            .unwrap_or(defaults.per_user),
        global: file
            .global_per_hour
            .map(BucketSpec::per_hour)
            .unwrap_or(defaults.global),
    }
}

fn notifier_config(file: &NotificationsConfig) -> Result<Option<NotifierConfig>, ConfigError> {
    match (&file.webhook_url, &file.webhook_secret) {
        (Some(url), Some(secret)) => Ok(Some(NotifierConfig {
            url: url.clone(),
            secret: secret.clone(),
        })),
        (Some(_), None) => Err(ConfigError::ValidationError(
            "notifications.webhook_url requires notifications.webhook_secret".into(),
        )),
        (None, _) => Ok(None),
    }
}

/// The pricing state a load or reload publishes.
pub fn pricing_state(file: PricingConfig) -> PricingState {
    PricingState {
        configuration: file.default,
        holidays: HolidayCalendar::new(file.holidays),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<RuntimeConfig, ConfigError> {
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        RuntimeConfig::try_from(file)
    }

    const PAYMENTS: &str = r#"
[payments]
base_url = "https://api.paystack.co/"
secret_key = "sk_test_123"
"#;

    #[test]
    fn test_missing_fields_keep_engine_defaults() {
        let config = parse(PAYMENTS).unwrap();
        let defaults = EngineSettings::default();
        assert_eq!(
            config.engine.dispatch.offer_timeout,
            defaults.dispatch.offer_timeout
        );
        assert_eq!(
            config.engine.dispatch.max_candidates,
            defaults.dispatch.max_candidates
        );
        assert_eq!(config.engine.locks.timeout, defaults.locks.timeout);
        assert_eq!(
            config.engine.reconciler.window_days,
            defaults.reconciler.window_days
        );
        assert_eq!(config.engine.payments.currency, "GHS");
        assert_eq!(config.timezone, UtcOffset::UTC);
        assert!(config.notifier.is_none());
        assert!(config.pricing.configuration.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let toml_str = format!(
            "{PAYMENTS}\npoll_cooldown_secs = 60\n\n[dispatch]\noffer_timeout_secs = 90\nlock_timeout_ms = 250\n\n[pricing]\ntimezone_offset_hours = 2\n\n[notifications]\nper_user_per_hour = 4\n"
        );
        let config = parse(&toml_str).unwrap();
        assert_eq!(
            config.engine.dispatch.offer_timeout,
            time::Duration::seconds(90)
        );
        assert_eq!(config.engine.locks.timeout, Duration::from_millis(250));
        assert_eq!(
            config.engine.payments.poll_cooldown,
            time::Duration::minutes(1)
        );
        assert_eq!(config.timezone.whole_hours(), 2);
        assert_eq!(config.engine.notifications.per_user.capacity, 4);
    }

    #[test]
    fn test_webhook_url_without_secret_is_rejected() {
        let toml_str =
            format!("{PAYMENTS}\n[notifications]\nwebhook_url = \"https://hooks.example.com/\"\n");
        assert!(matches!(
            parse(&toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_out_of_range_timezone_is_rejected() {
        let toml_str = format!("{PAYMENTS}\n[pricing]\ntimezone_offset_hours = 30\n");
        assert!(matches!(
            parse(&toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
