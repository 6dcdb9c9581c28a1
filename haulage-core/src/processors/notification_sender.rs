//! NotificationSender processor.
//!
//! Drains the notification outbox:
//! - Rate limits per (recipient, channel) and globally
//! - Wraps each notification in a `NotificationEnvelope`
//! - Hands it to the configured [`Notifier`]
//!
//! Delivery is best effort. Throttled or failed notifications are logged and
//! dropped; nothing upstream waits on them.

use std::sync::Arc;
use std::time::Duration;

use haulage_sdk::objects::{NotificationChannel, NotificationEnvelope};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::NotificationSettings;
use crate::events::{NotificationReceiver, OutboundNotification};
use crate::oracles::Notifier;
use crate::rate_limit::TokenBuckets;

const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

type LimitKey = (Option<Uuid>, NotificationChannel);

pub struct NotificationSender {
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    limits: TokenBuckets<LimitKey>,
}

impl NotificationSender {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: &NotificationSettings,
    ) -> Self {
        Self {
            notifier,
            clock,
            limits: TokenBuckets::new(settings.per_user, settings.global),
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut rx: NotificationReceiver) {
        info!("NotificationSender started");
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("NotificationSender received shutdown signal");
                        break;
                    }
                }

                Some(notification) = rx.recv() => {
                    self.deliver(notification).await;
                }

                _ = prune.tick() => {
                    self.limits.prune(self.clock.now());
                }

                else => {
                    info!("Notification outbox closed");
                    break;
                }
            }
        }

        info!("NotificationSender shutdown complete");
    }

    /// Returns whether the notification was handed to the notifier.
    async fn deliver(&self, notification: OutboundNotification) -> bool {
        let now = self.clock.now();
        let key = (notification.recipient, notification.channel);
        if !self.limits.try_take(&key, now) {
            warn!(
                recipient = ?notification.recipient,
                channel = %notification.channel,
                "Notification rate limited, dropping"
            );
            return false;
        }
        let envelope = NotificationEnvelope {
            id: Uuid::now_v7(),
            recipient: notification.recipient,
            channel: notification.channel,
            payload: notification.payload,
            created_at: now,
        };
        match self.notifier.publish(&envelope).await {
            Ok(()) => {
                debug!(notification_id = %envelope.id, "Notification delivered");
                true
            }
            Err(e) => {
                warn!(
                    notification_id = %envelope.id,
                    recipient = ?envelope.recipient,
                    error = %e,
                    "Notification delivery failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::OracleError;
    use crate::rate_limit::BucketSpec;
    use async_trait::async_trait;
    use haulage_sdk::objects::NotificationPayload;
    use parking_lot::Mutex;
    use time::macros::datetime;

    #[derive(Default)]
    struct Recording(Mutex<Vec<NotificationEnvelope>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), OracleError> {
            self.0.lock().push(envelope.clone());
            Ok(())
        }
    }

    fn alert(recipient: Option<Uuid>) -> OutboundNotification {
        OutboundNotification {
            recipient,
            channel: NotificationChannel::Push,
            payload: NotificationPayload::AdminAlert {
                subject: "s".into(),
                detail: "d".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_recipient() {
        let notifier = Arc::new(Recording::default());
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-04 10:00 UTC)));
        let settings = NotificationSettings {
            per_user: BucketSpec::per_hour(2),
            global: BucketSpec::per_hour(100),
        };
        let sender = NotificationSender::new(notifier.clone(), clock.clone(), &settings);

        let alice = Some(Uuid::now_v7());
        let bob = Some(Uuid::now_v7());
        assert!(sender.deliver(alert(alice)).await);
        assert!(sender.deliver(alert(alice)).await);
        assert!(!sender.deliver(alert(alice)).await);
        assert!(sender.deliver(alert(bob)).await);

        clock.advance(time::Duration::minutes(30));
        assert!(sender.deliver(alert(alice)).await);
        assert_eq!(notifier.0.lock().len(), 4);
    }
}
