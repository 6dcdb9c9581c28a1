//! Background processors.
//!
//! - `OfferExpirySweeper`: periodic offer expiry, refill and load shaping
//! - `ReconcileLoop`: periodic request/payment/job reconciliation
//! - `AutoAssignScheduler`: receives `AutoAssignRequest`, assigns after a delay
//! - `NotificationSender`: drains the notification outbox
//!
//! Each runs until its shutdown receiver flips to `true`, and hands the same
//! signal to the engine operations it starts as their cancellation.

pub mod auto_assign;
pub mod notification_sender;
pub mod offer_sweeper;
pub mod reconcile_loop;

pub use auto_assign::AutoAssignScheduler;
pub use notification_sender::NotificationSender;
pub use offer_sweeper::OfferExpirySweeper;
pub use reconcile_loop::ReconcileLoop;
