//! Event type definitions.
//!
//! Events carry identifiers plus the minimum needed to route them;
//! consumers re-fetch anything else from the store.

use std::time::Duration;

use compact_str::CompactString;
use haulage_sdk::objects::{NotificationChannel, NotificationPayload};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::entities::{JobStatus, OfferResponse, PaymentStatus, RequestStatus};

/// Something that happened inside the engine.
///
/// Published after the state change it describes has been committed.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    RequestSubmitted {
        request_id: Uuid,
        tracking_number: CompactString,
        base_price: Decimal,
    },
    RequestStatusChanged {
        request_id: Uuid,
        previous: RequestStatus,
        new: RequestStatus,
    },
    PaymentStatusChanged {
        payment_id: Uuid,
        request_id: Uuid,
        previous: PaymentStatus,
        new: PaymentStatus,
    },
    JobCreated {
        job_id: Uuid,
        request_id: Uuid,
        job_number: CompactString,
    },
    JobStatusChanged {
        job_id: Uuid,
        previous: JobStatus,
        new: JobStatus,
    },
    OffersDispatched {
        job_id: Uuid,
        offer_ids: Vec<Uuid>,
    },
    OfferResolved {
        offer_id: Uuid,
        job_id: Uuid,
        provider_id: Uuid,
        response: OfferResponse,
    },
    AdminAlert {
        subject: String,
        detail: String,
        job_id: Option<Uuid>,
    },
}

/// A notification waiting in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundNotification {
    /// `None` for operator alerts.
    pub recipient: Option<Uuid>,
    pub channel: NotificationChannel,
    pub payload: NotificationPayload,
}

/// Ask the auto-assign scheduler to try `job_id` after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAssignRequest {
    pub job_id: Uuid,
    pub delay: Duration,
}
