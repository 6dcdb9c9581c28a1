//! Event channel factories and the bus that fans events out to them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::types::{AutoAssignRequest, DomainEvent, OutboundNotification};

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type DomainEventSender = mpsc::Sender<DomainEvent>;
pub type DomainEventReceiver = mpsc::Receiver<DomainEvent>;

pub type NotificationSender = mpsc::Sender<OutboundNotification>;
pub type NotificationReceiver = mpsc::Receiver<OutboundNotification>;

pub type AutoAssignSender = mpsc::Sender<AutoAssignRequest>;
pub type AutoAssignReceiver = mpsc::Receiver<AutoAssignRequest>;

pub fn domain_event_channel() -> (DomainEventSender, DomainEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// The notification outbox, drained by the `NotificationSender` processor.
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

pub fn auto_assign_channel() -> (AutoAssignSender, AutoAssignReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Outbound side of every channel the engine writes to.
///
/// Subscribers are fixed when the bus is built. Every send is non-blocking:
/// a full or closed channel is logged and the event is dropped, so a slow
/// consumer can never hold up a state transition.
#[derive(Clone)]
pub struct EventBus {
    notifications: NotificationSender,
    auto_assign: AutoAssignSender,
    subscribers: Arc<[DomainEventSender]>,
}

impl EventBus {
    pub fn new(
        notifications: NotificationSender,
        auto_assign: AutoAssignSender,
        subscribers: Vec<DomainEventSender>,
    ) -> Self {
        Self {
            notifications,
            auto_assign,
            subscribers: subscribers.into(),
        }
    }

    pub fn publish(&self, event: DomainEvent) {
        for subscriber in self.subscribers.iter() {
            match subscriber.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(event = ?event, "Domain event subscriber is full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Domain event subscriber closed");
                }
            }
        }
    }

    /// Enqueue a notification. Returns `false` if it was dropped.
    pub fn notify(&self, notification: OutboundNotification) -> bool {
        match self.notifications.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                warn!(
                    recipient = ?n.recipient,
                    channel = %n.channel,
                    "Notification outbox full, dropping notification"
                );
                false
            }
            Err(TrySendError::Closed(n)) => {
                warn!(
                    recipient = ?n.recipient,
                    channel = %n.channel,
                    "Notification outbox closed, dropping notification"
                );
                false
            }
        }
    }

    pub fn schedule_auto_assign(&self, request: AutoAssignRequest) -> bool {
        match self.auto_assign.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %request.job_id, error = %e, "Failed to schedule auto-assign");
                false
            }
        }
    }
}
