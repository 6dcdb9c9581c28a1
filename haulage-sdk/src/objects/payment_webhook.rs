//! Inbound payment-processor callbacks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signature::Signature;

/// Status values a payment processor reports.
///
/// Wider than [`super::PaymentStatus`]: the `requires_*` states are
/// intermediate processor states that the engine folds into `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentWebhookStatus {
    Pending,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    RequiresConfirmation,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

/// Body of a `POST /webhooks/payments` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWebhookPayload {
    /// Processor-side intent id, as returned by initialization.
    pub intent_id: String,
    pub status: PaymentWebhookStatus,
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Signature for PaymentWebhookPayload {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_payload() {
        let payload: PaymentWebhookPayload =
            serde_json::from_str(r#"{"intent_id":"pi_123","status":"requires_action"}"#).unwrap();
        assert_eq!(payload.status, PaymentWebhookStatus::RequiresAction);
        assert!(payload.charge_id.is_none());
        assert!(payload.metadata.is_null());
    }
}
