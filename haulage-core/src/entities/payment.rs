use haulage_sdk::objects::{PaymentStatus as SdkPaymentStatus, PaymentWebhookStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::RequestPaymentStatus;

/// Payment status for database operations.
///
/// This is the sqlx::Type version. For wire use, see
/// `haulage_sdk::objects::PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "payment_status")]
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

impl PaymentStatus {
    /// No further processor-driven change is expected.
    pub fn is_settled(self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, Refunded)
                | (Completed, PartiallyRefunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// Canonical mapping onto the request's payment status.
    pub fn request_payment_status(self) -> RequestPaymentStatus {
        match self {
            PaymentStatus::Completed => RequestPaymentStatus::Completed,
            PaymentStatus::Pending | PaymentStatus::Processing => RequestPaymentStatus::Pending,
            PaymentStatus::Failed | PaymentStatus::Cancelled => RequestPaymentStatus::Failed,
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded => {
                RequestPaymentStatus::Refunded
            }
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkPaymentStatus::from(*self).fmt(f)
    }
}

impl From<PaymentStatus> for SdkPaymentStatus {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Pending => SdkPaymentStatus::Pending,
            PaymentStatus::Processing => SdkPaymentStatus::Processing,
            PaymentStatus::Completed => SdkPaymentStatus::Completed,
            PaymentStatus::Failed => SdkPaymentStatus::Failed,
            PaymentStatus::Cancelled => SdkPaymentStatus::Cancelled,
            PaymentStatus::Refunded => SdkPaymentStatus::Refunded,
            PaymentStatus::PartiallyRefunded => SdkPaymentStatus::PartiallyRefunded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "payment_type")]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Deposit,
    Full,
    Final,
    Additional,
    Refund,
}

/// Status as reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleStatus {
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

impl OracleStatus {
    pub fn is_terminal(self) -> bool {
        self.payment_status().is_settled()
    }

    pub fn payment_status(self) -> PaymentStatus {
        match self {
            OracleStatus::Pending => PaymentStatus::Pending,
            OracleStatus::Processing
            | OracleStatus::RequiresAction
            | OracleStatus::RequiresPaymentMethod
            | OracleStatus::RequiresConfirmation => PaymentStatus::Processing,
            OracleStatus::Succeeded => PaymentStatus::Completed,
            OracleStatus::Failed => PaymentStatus::Failed,
            OracleStatus::Cancelled => PaymentStatus::Cancelled,
            OracleStatus::Refunded => PaymentStatus::Refunded,
            OracleStatus::PartiallyRefunded => PaymentStatus::PartiallyRefunded,
        }
    }
}

impl From<PaymentWebhookStatus> for OracleStatus {
    fn from(value: PaymentWebhookStatus) -> Self {
        match value {
            PaymentWebhookStatus::Pending => OracleStatus::Pending,
            PaymentWebhookStatus::Processing => OracleStatus::Processing,
            PaymentWebhookStatus::RequiresAction => OracleStatus::RequiresAction,
            PaymentWebhookStatus::RequiresPaymentMethod => OracleStatus::RequiresPaymentMethod,
            PaymentWebhookStatus::RequiresConfirmation => OracleStatus::RequiresConfirmation,
            PaymentWebhookStatus::Succeeded => OracleStatus::Succeeded,
            PaymentWebhookStatus::Failed => OracleStatus::Failed,
            PaymentWebhookStatus::Cancelled => OracleStatus::Cancelled,
            PaymentWebhookStatus::Refunded => OracleStatus::Refunded,
            PaymentWebhookStatus::PartiallyRefunded => OracleStatus::PartiallyRefunded,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_type: PaymentType,
    /// Reference sent to the processor; unique.
    pub reference: String,
    pub intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub authorization_url: Option<String>,
    pub refunded_amount: Decimal,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub last_polled_at: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
}
