//! Notifications emitted by the dispatch engine.
//!
//! When a webhook endpoint is configured, each notification is POSTed as a
//! [`NotificationEnvelope`] signed with [`crate::signature::SignedObject`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, RequestStatus};
use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Push,
    Sms,
    Email,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationChannel::InApp => write!(f, "in_app"),
            NotificationChannel::Push => write!(f, "push"),
            NotificationChannel::Sms => write!(f, "sms"),
            NotificationChannel::Email => write!(f, "email"),
        }
    }
}

/// What happened, from the recipient's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    /// A provider has been offered a job.
    JobOffered {
        offer_id: Uuid,
        job_number: String,
        offered_price: Decimal,
        distance_km: f64,
        expires_at: time::OffsetDateTime,
    },
    /// The job was assigned to someone else, or the offer expired.
    OfferWithdrawn { offer_id: Uuid, job_number: String },
    /// The provider tried to accept but the job was already taken.
    JobNoLongerAvailable { offer_id: Uuid, job_number: String },
    /// The customer's request moved to a new status.
    RequestStatusChanged {
        tracking_number: String,
        status: RequestStatus,
    },
    /// A job the provider holds moved to a new status.
    JobStatusChanged {
        job_number: String,
        status: JobStatus,
        reason: Option<String>,
    },
    PaymentReceived {
        tracking_number: String,
        amount: Decimal,
        currency: String,
    },
    /// Operator attention required.
    AdminAlert { subject: String, detail: String },
}

/// Envelope posted to the notification webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub id: Uuid,
    /// Recipient user id; `None` for operator alerts.
    pub recipient: Option<Uuid>,
    pub channel: NotificationChannel,
    pub payload: NotificationPayload,
    pub created_at: time::OffsetDateTime,
}

impl Signature for NotificationEnvelope {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let payload = NotificationPayload::AdminAlert {
            subject: "no candidates".to_string(),
            detail: "JOB-202601-001".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "admin_alert");
        assert_eq!(value["subject"], "no candidates");
    }

    #[test]
    fn test_channel_wire_names() {
        let json = serde_json::to_string(&NotificationChannel::InApp).unwrap();
        assert_eq!(json, "\"in_app\"");
        assert_eq!(NotificationChannel::Sms.to_string(), "sms");
    }
}
