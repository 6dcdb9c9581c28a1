//! Domain events and the channels that carry them.
//!
//! # Event Flow
//!
//! 1. Engine operations publish `DomainEvent`s to the subscribers the bus
//!    was built with, after the state change is committed.
//! 2. Notifications go to the outbox -> `NotificationSender`.
//! 3. Urgent escalations go to `AutoAssignScheduler`, which calls back into
//!    the engine after a delay.
//!
//! All sends are non-blocking; consumers re-fetch from the store.

pub mod channels;
pub mod types;

pub use channels::{
    AutoAssignReceiver, AutoAssignSender, DEFAULT_CHANNEL_BUFFER, DomainEventReceiver,
    DomainEventSender, EventBus, NotificationReceiver, NotificationSender, auto_assign_channel,
    domain_event_channel, notification_channel,
};
pub use types::{AutoAssignRequest, DomainEvent, OutboundNotification};
