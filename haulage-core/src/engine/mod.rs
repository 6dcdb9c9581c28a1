//! The job dispatch engine.
//!
//! [`Engine`] owns the collaborators and the keyed locks; its operations are
//! spread over the submodules by concern:
//!
//! - `lifecycle`: request editing, submission, settlement, job creation and
//!   the job state machine
//! - `matcher`: candidate filtering and scoring
//! - `dispatch`: offer fan-out, arbitration, expiry, escalation, load shaping
//! - `payments`: payment intents, webhooks, polling and refunds
//! - `reconciler`: the repair pass over request/payment/job drift
//! - `ratings`: ratings and their effect on provider metrics
//!
//! Lock order is request, then job. No operation holds a request lock while
//! waiting on the payment oracle's backoff polling of another request.

mod dispatch;
mod lifecycle;
mod matcher;
mod payments;
mod ratings;
mod reconciler;

use std::sync::Arc;

use haulage_sdk::objects::{NotificationChannel, NotificationPayload};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use uuid::Uuid;

pub use dispatch::{DispatchOutcome, SweepSummary, is_peak_hour, offer_price};
pub use lifecycle::{NewItem, NewRequest, NewStop, validate_pickup_date};
pub use matcher::{Candidate, Rejection, ScoreBreakdown, check_eligibility, rank_candidates};
pub use payments::{PaymentUpdate, PollOutcome};
pub use reconciler::{ReconcileSummary, RepairAction, RepairDetail};

use crate::config::EngineSettings;
use crate::entities::{Job, Provider, Request};
use crate::error::DispatchError;
use crate::events::{DomainEvent, EventBus, OutboundNotification};
use crate::locks::KeyedLocks;
use crate::oracles::{GeoOracle, PaymentOracle};
use crate::pricing::PricingService;
use crate::store::{MetricsUpdate, Store};

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Collaborators an [`Engine`] is built from.
pub struct EngineParts {
    pub store: Arc<dyn Store>,
    pub pricing: PricingService,
    pub payments: Arc<dyn PaymentOracle>,
    pub geo: Arc<dyn GeoOracle>,
    pub bus: EventBus,
    pub settings: EngineSettings,
}

pub struct Engine {
    store: Arc<dyn Store>,
    pricing: PricingService,
    payments: Arc<dyn PaymentOracle>,
    geo: Arc<dyn GeoOracle>,
    bus: EventBus,
    request_locks: KeyedLocks<Uuid>,
    job_locks: KeyedLocks<Uuid>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let timeout = parts.settings.locks.timeout;
        Self {
            store: parts.store,
            pricing: parts.pricing,
            payments: parts.payments,
            geo: parts.geo,
            bus: parts.bus,
            request_locks: KeyedLocks::new("request", timeout),
            job_locks: KeyedLocks::new("job", timeout),
            settings: parts.settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn pricing(&self) -> &PricingService {
        &self.pricing
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn load_request(&self, id: Uuid) -> Result<Request, DispatchError> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("request", id))
    }

    async fn load_job(&self, id: Uuid) -> Result<Job, DispatchError> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("job", id))
    }

    async fn load_provider(&self, id: Uuid) -> Result<Provider, DispatchError> {
        self.store
            .get_provider(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("provider", id))
    }

    /// Best effort; a dropped notification is logged and never fails the
    /// caller.
    fn notify(
        &self,
        recipient: Option<Uuid>,
        channel: NotificationChannel,
        payload: NotificationPayload,
    ) {
        let delivered = self.bus.notify(OutboundNotification {
            recipient,
            channel,
            payload,
        });
        if !delivered {
            let e = DispatchError::NotifyFailed("outbox rejected notification".to_string());
            warn!(recipient = ?recipient, %channel, error = %e, "Notification dropped");
        }
    }

    fn notify_customer(&self, request: &Request) {
        self.notify(
            Some(request.user_id),
            NotificationChannel::InApp,
            NotificationPayload::RequestStatusChanged {
                tracking_number: request.tracking_number.to_string(),
                status: request.status.into(),
            },
        );
    }

    async fn fold_metrics(&self, provider_id: Uuid, update: MetricsUpdate) {
        if let Err(e) = self.store.update_provider_metrics(provider_id, update).await {
            warn!(%provider_id, error = %e, "Failed to update provider metrics");
        }
    }

    /// Raise an operator alert on the bus and in the outbox.
    fn alert(&self, subject: impl Into<String>, detail: impl Into<String>, job_id: Option<Uuid>) {
        let subject = subject.into();
        let detail = detail.into();
        warn!(subject = %subject, detail = %detail, job_id = ?job_id, "Admin alert");
        self.notify(
            None,
            NotificationChannel::Email,
            NotificationPayload::AdminAlert {
                subject: subject.clone(),
                detail: detail.clone(),
            },
        );
        self.bus.publish(DomainEvent::AdminAlert {
            subject,
            detail,
            job_id,
        });
    }
}
