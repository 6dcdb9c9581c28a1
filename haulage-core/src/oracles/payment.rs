//! Payment processor port.
//!
//! The HTTP adapter speaks a Paystack-shaped API: amounts in minor units,
//! bearer-token auth, and a `{status, message, data}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Cancellation;
use crate::entities::OracleStatus;
use crate::error::OracleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub authorization_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    pub status: OracleStatus,
    pub charge_id: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
}

/// Result of [`PaymentOracle::poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollUntil {
    Terminal(VerifiedPayment),
    Exhausted {
        last_status: Option<OracleStatus>,
        last_error: Option<String>,
    },
    Cancelled,
}

/// `base * 2^attempt`.
pub fn calculate_retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[async_trait]
pub trait PaymentOracle: Send + Sync {
    async fn initialize(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, OracleError>;

    async fn verify(&self, intent_id: &str) -> Result<VerifiedPayment, OracleError>;

    async fn refund(
        &self,
        intent_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundReceipt, OracleError>;

    /// Verify repeatedly until the processor reports a settled status.
    ///
    /// Waits `base_delay * 2^n` between attempts and never sleeps after the
    /// last one.
    async fn poll_until(
        &self,
        intent_id: &str,
        max_attempts: u32,
        base_delay: Duration,
        cancel: &Cancellation,
    ) -> PollUntil {
        let mut last_status = None;
        let mut last_error = None;
        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return PollUntil::Cancelled;
            }
            match self.verify(intent_id).await {
                Ok(verified) if verified.status.is_terminal() => {
                    return PollUntil::Terminal(verified);
                }
                Ok(verified) => {
                    debug!(intent_id, attempt, status = ?verified.status, "Payment still in flight");
                    last_status = Some(verified.status);
                }
                Err(e) => {
                    warn!(intent_id, attempt, error = %e, "Payment verification failed");
                    last_error = Some(e.to_string());
                }
            }
            if attempt + 1 < max_attempts
                && cancel
                    .sleep(calculate_retry_delay(base_delay, attempt))
                    .await
                    .is_err()
            {
                return PollUntil::Cancelled;
            }
        }
        PollUntil::Exhausted {
            last_status,
            last_error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self) -> Result<T, OracleError> {
        if !self.status {
            return Err(OracleError::Unexpected(self.message));
        }
        self.data
            .ok_or_else(|| OracleError::Unexpected(format!("missing data: {}", self.message)))
    }
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    reference: String,
    authorization_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    id: Option<serde_json::Value>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    transaction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    id: serde_json::Value,
}

fn to_minor_units(amount: Decimal) -> Result<i64, OracleError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| OracleError::Unexpected(format!("amount out of range: {amount}")))
}

/// Map a processor status string onto [`OracleStatus`].
pub fn parse_processor_status(status: &str) -> Option<OracleStatus> {
    Some(match status {
        "success" | "succeeded" => OracleStatus::Succeeded,
        "failed" => OracleStatus::Failed,
        "abandoned" | "cancelled" => OracleStatus::Cancelled,
        "reversed" | "refunded" => OracleStatus::Refunded,
        "partially_refunded" => OracleStatus::PartiallyRefunded,
        "pending" => OracleStatus::Pending,
        "ongoing" | "processing" | "queued" => OracleStatus::Processing,
        "send_otp" | "send_pin" | "send_phone" | "open_url" | "requires_action" => {
            OracleStatus::RequiresAction
        }
        "requires_payment_method" => OracleStatus::RequiresPaymentMethod,
        "requires_confirmation" => OracleStatus::RequiresConfirmation,
        _ => return None,
    })
}

pub struct HttpPaymentOracle {
    base_url: url::Url,
    secret_key: String,
    http_client: reqwest::Client,
}

impl HttpPaymentOracle {
    pub fn new(base_url: url::Url, secret_key: String) -> Self {
        Self {
            base_url,
            secret_key,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, OracleError> {
        self.base_url
            .join(path)
            .map_err(|e| OracleError::Unexpected(format!("bad endpoint {path}: {e}")))
    }

    async fn read<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, OracleError> {
        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Unavailable(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl PaymentOracle for HttpPaymentOracle {
    async fn initialize(
        &self,
        amount: Decimal,
        currency: &str,
        reference: &str,
        metadata: serde_json::Value,
    ) -> Result<PaymentIntent, OracleError> {
        let body = InitializeBody {
            amount: to_minor_units(amount)?,
            currency,
            reference,
            metadata,
        };
        let response = self
            .http_client
            .post(self.endpoint("transaction/initialize")?)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;
        let data: InitializeData = Self::read(response).await?;
        Ok(PaymentIntent {
            intent_id: data.reference,
            authorization_url: data.authorization_url,
        })
    }

    async fn verify(&self, intent_id: &str) -> Result<VerifiedPayment, OracleError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("transaction/verify/{intent_id}"))?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let data: VerifyData = Self::read(response).await?;
        let status = parse_processor_status(&data.status)
            .ok_or_else(|| OracleError::Unexpected(format!("unknown status {}", data.status)))?;
        Ok(VerifiedPayment {
            status,
            charge_id: data.id.map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            metadata: data.metadata,
        })
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundReceipt, OracleError> {
        let body = RefundBody {
            transaction: intent_id,
            amount: amount.map(to_minor_units).transpose()?,
        };
        let response = self
            .http_client
            .post(self.endpoint("refund")?)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?;
        let data: RefundData = Self::read(response).await?;
        let refund_id = match data.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(RefundReceipt { refund_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_calculate_retry_delay() {
        let base = Duration::from_secs(2);
        assert_eq!(calculate_retry_delay(base, 0), Duration::from_secs(2));
        assert_eq!(calculate_retry_delay(base, 1), Duration::from_secs(4));
        assert_eq!(calculate_retry_delay(base, 4), Duration::from_secs(32));
    }

    #[test]
    fn test_minor_units_and_status_parsing() {
        assert_eq!(to_minor_units(Decimal::new(12345, 2)).unwrap(), 12345);
        assert_eq!(parse_processor_status("success"), Some(OracleStatus::Succeeded));
        assert_eq!(parse_processor_status("send_otp"), Some(OracleStatus::RequiresAction));
        assert_eq!(parse_processor_status("mystery"), None);
    }

    /// Reports processing until the configured attempt, then success.
    struct SettlesAfter {
        calls: AtomicU32,
        settle_on: u32,
    }

    #[async_trait]
    impl PaymentOracle for SettlesAfter {
        async fn initialize(
            &self,
            _: Decimal,
            _: &str,
            _: &str,
            _: serde_json::Value,
        ) -> Result<PaymentIntent, OracleError> {
            Err(OracleError::Unsupported)
        }

        async fn verify(&self, _: &str) -> Result<VerifiedPayment, OracleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n >= self.settle_on {
                OracleStatus::Succeeded
            } else {
                OracleStatus::Processing
            };
            Ok(VerifiedPayment {
                status,
                charge_id: None,
                metadata: serde_json::Value::Null,
            })
        }

        async fn refund(&self, _: &str, _: Option<Decimal>) -> Result<RefundReceipt, OracleError> {
            Err(OracleError::Unsupported)
        }
    }

    #[tokio::test]
    async fn test_poll_until_reaches_terminal() {
        let oracle = SettlesAfter {
            calls: AtomicU32::new(0),
            settle_on: 3,
        };
        let result = oracle
            .poll_until("pi_1", 5, Duration::from_millis(1), &Cancellation::never())
            .await;
        assert!(matches!(result, PollUntil::Terminal(ref v) if v.status == OracleStatus::Succeeded));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_exhausts() {
        let oracle = SettlesAfter {
            calls: AtomicU32::new(0),
            settle_on: u32::MAX,
        };
        let result = oracle
            .poll_until("pi_1", 3, Duration::from_millis(1), &Cancellation::never())
            .await;
        assert_eq!(
            result,
            PollUntil::Exhausted {
                last_status: Some(OracleStatus::Processing),
                last_error: None
            }
        );
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_honours_cancellation() {
        let oracle = SettlesAfter {
            calls: AtomicU32::new(0),
            settle_on: u32::MAX,
        };
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let result = oracle
            .poll_until("pi_1", 5, Duration::from_secs(60), &cancel)
            .await;
        assert_eq!(result, PollUntil::Cancelled);
    }
}
