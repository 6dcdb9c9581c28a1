use std::time::Duration;

use rust_decimal::Decimal;

use crate::rate_limit::BucketSpec;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// How long a provider has to answer an offer.
    pub offer_timeout: time::Duration,
    /// Fan-out cap per job.
    pub max_candidates: usize,
    pub max_offer_distance_km: f64,
    /// Providers with this many concurrently active jobs are skipped.
    pub max_active_jobs: u32,
    pub expiry_sweep_interval: Duration,
    pub auto_assign_delay: Duration,
    /// Pending offers per provider at which load shaping kicks in.
    pub rebalance_threshold: usize,
    /// Offers kept per overloaded provider; the rest are expired.
    pub rebalance_keep: usize,
    pub per_km_rate: Decimal,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            offer_timeout: time::Duration::minutes(5),
            max_candidates: 5,
            max_offer_distance_km: 10.0,
            max_active_jobs: 3,
            expiry_sweep_interval: Duration::from_secs(30),
            auto_assign_delay: Duration::from_secs(60),
            rebalance_threshold: 5,
            rebalance_keep: 2,
            per_km_rate: Decimal::TWO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    /// Processing longer than this escalates to backoff polling.
    pub stuck_after: time::Duration,
    pub poll_base_delay: Duration,
    pub poll_max_attempts: u32,
    /// Minimum gap between reconciler-driven polls of one payment.
    pub poll_cooldown: time::Duration,
    /// Secret for inbound webhook signatures.
    pub webhook_secret: Option<String>,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            currency: "GHS".to_string(),
            stuck_after: time::Duration::hours(1),
            poll_base_delay: Duration::from_secs(2),
            poll_max_attempts: 5,
            poll_cooldown: time::Duration::minutes(15),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    /// Only requests created within this many days are scanned.
    pub window_days: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            window_days: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: crate::locks::DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub per_user: BucketSpec,
    pub global: BucketSpec,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            per_user: BucketSpec::per_hour(30),
            global: BucketSpec::per_hour(5000),
        }
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub dispatch: DispatchSettings,
    pub payments: PaymentSettings,
    pub reconciler: ReconcilerSettings,
    pub locks: LockSettings,
    pub notifications: NotificationSettings,
}
