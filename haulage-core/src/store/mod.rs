//! Repository port.
//!
//! One trait per aggregate, joined by [`Store`]. The multi-row operations
//! (`create_job_for_request`, `commit_acceptance`, `transition_job`) are
//! atomic in every adapter.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::{
    Job, JobStatus, Offer, OfferResponse, Payment, PricingConfiguration, Provider,
    ProviderMetrics, Rating, RatingTarget, Request, RequestStatus, TimelineEvent,
};
use crate::error::StoreError;
use crate::geo::GeoPoint;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of [`JobRepository::create_job_for_request`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobCreation {
    Created(Job),
    /// The request already had a job; nothing was written.
    Existing(Job),
}

impl JobCreation {
    pub fn job(&self) -> &Job {
        match self {
            JobCreation::Created(job) | JobCreation::Existing(job) => job,
        }
    }
}

/// A guarded job status change plus what goes with it.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: OffsetDateTime,
    pub event: TimelineEvent,
    /// Request status written in the same unit of work.
    pub request_status: Option<(Uuid, RequestStatus)>,
    /// Pending offers on the job are expired in the same unit of work.
    pub expire_pending_offers: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        job: Job,
        expired_offers: Vec<Offer>,
    },
    /// The job was not in `from`; carries the status it was found in.
    Stale(JobStatus),
}

#[derive(Debug, Clone)]
pub struct Acceptance {
    pub job_id: Uuid,
    pub offer_id: Uuid,
    pub request_id: Uuid,
    pub at: OffsetDateTime,
    pub event: TimelineEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Accepted {
        job: Job,
        offer: Offer,
        /// Sibling offers that were still pending and are now expired.
        expired_offers: Vec<Offer>,
    },
    /// The job was assigned, cancelled or otherwise moved on.
    JobUnavailable,
    /// The offer is no longer pending, or has passed its deadline.
    OfferUnavailable,
}

/// A change folded into a provider's rolling metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricsUpdate {
    Rating(u8),
    ResponseMinutes(f64),
    Finished { completed: bool },
}

impl MetricsUpdate {
    pub fn apply(self, metrics: &mut ProviderMetrics) {
        match self {
            MetricsUpdate::Rating(score) => metrics.record_rating(score),
            MetricsUpdate::ResponseMinutes(minutes) => metrics.record_response(minutes),
            MetricsUpdate::Finished { completed } => metrics.record_finished(completed),
        }
    }
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Fails with `Conflict` on a duplicate tracking number.
    async fn insert_request(&self, request: &Request) -> Result<(), StoreError>;

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError>;

    async fn request_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Request>, StoreError>;

    /// Replace the stored request, its stops and items.
    async fn save_request(&self, request: &Request) -> Result<(), StoreError>;

    /// Requests created since `since` that may need repair: status in
    /// {draft, pending, payment_completed} or payment status pending.
    async fn requests_for_reconciliation(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<Request>, StoreError>;
}

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError>;

    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>, StoreError>;

    /// Providers whose current location lies within `radius_km` of `center`.
    async fn providers_within_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Provider>, StoreError>;

    /// Jobs assigned to the provider that are not finished.
    async fn active_job_count(&self, provider_id: Uuid) -> Result<u32, StoreError>;

    async fn update_provider_metrics(
        &self,
        provider_id: Uuid,
        update: MetricsUpdate,
    ) -> Result<Option<ProviderMetrics>, StoreError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn job_for_request(&self, request_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs whose number starts with `prefix`.
    async fn count_jobs_with_prefix(&self, prefix: &str) -> Result<u32, StoreError>;

    /// Insert `job`, move its request to `request_status` and append
    /// `event`. If the request already has a job, nothing is written.
    ///
    /// Fails with `Conflict` when `job.job_number` is taken.
    async fn create_job_for_request(
        &self,
        job: &Job,
        request_status: RequestStatus,
        event: &TimelineEvent,
    ) -> Result<JobCreation, StoreError>;

    async fn transition_job(&self, transition: JobTransition)
    -> Result<TransitionOutcome, StoreError>;

    /// First-accept-wins: assign the offer's provider to the job, accept the
    /// offer and expire every other pending offer on the job.
    async fn commit_acceptance(&self, acceptance: Acceptance) -> Result<AcceptOutcome, StoreError>;

    async fn append_timeline(&self, event: &TimelineEvent) -> Result<(), StoreError>;

    /// Oldest first.
    async fn timeline_for_job(&self, job_id: Uuid) -> Result<Vec<TimelineEvent>, StoreError>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    /// Offers for an already-offered (job, provider) pair are skipped.
    /// Returns the offers actually written.
    async fn insert_offers(&self, offers: &[Offer]) -> Result<Vec<Offer>, StoreError>;

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, StoreError>;

    /// Best rank first.
    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<Offer>, StoreError>;

    /// Oldest first.
    async fn pending_offers_for_provider(&self, provider_id: Uuid)
    -> Result<Vec<Offer>, StoreError>;

    async fn expired_pending_offers(&self, now: OffsetDateTime) -> Result<Vec<Offer>, StoreError>;

    async fn providers_with_pending_offers(&self, at_least: usize)
    -> Result<Vec<Uuid>, StoreError>;

    /// Move a pending offer to `response`. Returns the updated offer, or
    /// `None` if it was no longer pending.
    async fn resolve_offer(
        &self,
        offer_id: Uuid,
        response: OfferResponse,
        at: OffsetDateTime,
    ) -> Result<Option<Offer>, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Conflict` on a duplicate reference.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, StoreError>;

    async fn latest_payment_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Payment>, StoreError>;

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RatingRepository: Send + Sync {
    /// Fails with `Conflict` when the rater already rated the target.
    async fn insert_rating(&self, rating: &Rating) -> Result<(), StoreError>;

    async fn ratings_for(&self, target: RatingTarget) -> Result<Vec<Rating>, StoreError>;
}

#[async_trait]
pub trait PricingRepository: Send + Sync {
    /// Store `configuration` and make it the active one.
    async fn activate_pricing_configuration(
        &self,
        configuration: &PricingConfiguration,
    ) -> Result<(), StoreError>;

    async fn active_pricing_configuration(
        &self,
    ) -> Result<Option<PricingConfiguration>, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait Store:
    RequestRepository
    + ProviderRepository
    + JobRepository
    + OfferRepository
    + PaymentRepository
    + RatingRepository
    + PricingRepository
{
}

impl<T> Store for T where
    T: RequestRepository
        + ProviderRepository
        + JobRepository
        + OfferRepository
        + PaymentRepository
        + RatingRepository
        + PricingRepository
{
}

/// Stamp the status timestamp that goes with `to`.
pub(crate) fn apply_job_status(job: &mut Job, to: JobStatus, at: OffsetDateTime) {
    job.status = to;
    job.updated_at = at;
    match to {
        JobStatus::Assigned => job.assigned_at = Some(at),
        JobStatus::InTransit => job.started_at = Some(at),
        JobStatus::Completed => job.completed_at = Some(at),
        JobStatus::Cancelled => job.cancelled_at = Some(at),
        JobStatus::Draft | JobStatus::Pending => {}
    }
}
