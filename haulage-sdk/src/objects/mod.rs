pub mod notification;
pub mod payment_webhook;
pub mod pricing;

pub use notification::{NotificationChannel, NotificationEnvelope, NotificationPayload};
pub use payment_webhook::{PaymentWebhookPayload, PaymentWebhookStatus};
pub use pricing::{ForecastDayObject, PriceComponentObject, PriceQuoteObject, StaffOptionObject};

use serde::{Deserialize, Serialize};

pub use crate::signature::Signature;

/// Request status for API responses.
///
/// This is the wire version. For engine logic, use the version in
/// `haulage-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    Bidding,
    PaymentCompleted,
    Accepted,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Draft => write!(f, "draft"),
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Bidding => write!(f, "bidding"),
            RequestStatus::PaymentCompleted => write!(f, "payment_completed"),
            RequestStatus::Accepted => write!(f, "accepted"),
            RequestStatus::Assigned => write!(f, "assigned"),
            RequestStatus::InTransit => write!(f, "in_transit"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Job status for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Pending,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Draft => write!(f, "draft"),
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Assigned => write!(f, "assigned"),
            JobStatus::InTransit => write!(f, "in_transit"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Payment status for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Processing => write!(f, "processing"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Cancelled => write!(f, "cancelled"),
            PaymentStatus::Refunded => write!(f, "refunded"),
            PaymentStatus::PartiallyRefunded => write!(f, "partially_refunded"),
        }
    }
}

/// Offer response for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferResponse {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl std::fmt::Display for OfferResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferResponse::Pending => write!(f, "pending"),
            OfferResponse::Accepted => write!(f, "accepted"),
            OfferResponse::Declined => write!(f, "declined"),
            OfferResponse::Expired => write!(f, "expired"),
        }
    }
}
