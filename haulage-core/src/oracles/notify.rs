//! Notification transports.

use std::time::Duration;

use async_trait::async_trait;
use haulage_sdk::objects::NotificationEnvelope;
use haulage_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use tracing::info;

use crate::error::OracleError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), OracleError>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), OracleError> {
        info!(
            notification_id = %envelope.id,
            recipient = ?envelope.recipient,
            channel = %envelope.channel,
            payload = ?envelope.payload,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs each envelope to a fixed URL, signed with `Haulage-Signature`.
pub struct WebhookNotifier {
    url: url::Url,
    secret: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: url::Url, secret: String) -> Self {
        Self {
            url,
            secret,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), OracleError> {
        let signed = SignedObject::new(envelope.clone(), self.secret.as_bytes())
            .map_err(|e| OracleError::Unexpected(format!("payload serialization error: {e}")))?;
        let response = self
            .http_client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(signed.json)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(OracleError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
