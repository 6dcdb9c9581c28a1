//! PostgreSQL adapter.
//!
//! Each statement is a kanau `Processor` query struct run against
//! [`DatabaseProcessor`]; [`PgStore`] only routes the repository traits to
//! them.

mod jobs;
mod offers;
mod payments;
mod pricing;
mod providers;
mod ratings;
mod requests;

use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

pub use jobs::*;
pub use offers::{
    GetOfferById, InsertOffers, ListExpiredPendingOffers, ListOffersForJob,
    ListOverloadedProviders, ListPendingOffersForProvider, ResolveOffer,
};
pub use payments::*;
pub use pricing::*;
pub use providers::*;
pub use ratings::*;
pub use requests::*;

use super::{
    AcceptOutcome, Acceptance, JobCreation, JobRepository, JobTransition, MetricsUpdate,
    OfferRepository, PaymentRepository, PricingRepository, ProviderRepository, RatingRepository,
    RequestRepository, TransitionOutcome,
};
use crate::entities::{
    Job, Offer, OfferResponse, Payment, PricingConfiguration, Provider, ProviderMetrics, Rating,
    RatingTarget, Request, RequestStatus, TimelineEvent,
};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use crate::geo::GeoPoint;

/// Read a non-negative integer column.
pub(crate) fn unsigned<T: TryFrom<i64>>(
    value: impl Into<i64>,
    column: &'static str,
) -> Result<T, StoreError> {
    let value = value.into();
    T::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

pub(crate) fn signed(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }
}

#[async_trait]
impl RequestRepository for PgStore {
    async fn insert_request(&self, request: &Request) -> Result<(), StoreError> {
        self.db
            .process(InsertRequest {
                request: request.clone(),
            })
            .await
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        self.db.process(GetRequestById { id }).await
    }

    async fn request_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Request>, StoreError> {
        self.db
            .process(GetRequestByTrackingNumber {
                tracking_number: tracking_number.to_string(),
            })
            .await
    }

    async fn save_request(&self, request: &Request) -> Result<(), StoreError> {
        self.db
            .process(SaveRequest {
                request: request.clone(),
            })
            .await
    }

    async fn requests_for_reconciliation(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<Request>, StoreError> {
        self.db.process(ListRequestsForReconciliation { since }).await
    }
}

#[async_trait]
impl ProviderRepository for PgStore {
    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        self.db
            .process(UpsertProvider {
                provider: provider.clone(),
            })
            .await
    }

    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>, StoreError> {
        self.db.process(GetProviderById { id }).await
    }

    async fn providers_within_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Provider>, StoreError> {
        self.db
            .process(ListProvidersWithinRadius { center, radius_km })
            .await
    }

    async fn active_job_count(&self, provider_id: Uuid) -> Result<u32, StoreError> {
        self.db
            .process(CountActiveJobsForProvider { provider_id })
            .await
    }

    async fn update_provider_metrics(
        &self,
        provider_id: Uuid,
        update: MetricsUpdate,
    ) -> Result<Option<ProviderMetrics>, StoreError> {
        self.db
            .process(UpdateProviderMetrics {
                provider_id,
                update,
            })
            .await
    }
}

#[async_trait]
impl JobRepository for PgStore {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.db.process(GetJobById { id }).await
    }

    async fn job_for_request(&self, request_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.db.process(GetJobByRequest { request_id }).await
    }

    async fn count_jobs_with_prefix(&self, prefix: &str) -> Result<u32, StoreError> {
        self.db
            .process(CountJobsWithPrefix {
                prefix: prefix.to_string(),
            })
            .await
    }

    async fn create_job_for_request(
        &self,
        job: &Job,
        request_status: RequestStatus,
        event: &TimelineEvent,
    ) -> Result<JobCreation, StoreError> {
        self.db
            .process(CreateJobForRequest {
                job: job.clone(),
                request_status,
                event: event.clone(),
            })
            .await
    }

    async fn transition_job(
        &self,
        transition: JobTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        self.db.process(TransitionJob { transition }).await
    }

    async fn commit_acceptance(&self, acceptance: Acceptance) -> Result<AcceptOutcome, StoreError> {
        self.db.process(CommitAcceptance { acceptance }).await
    }

    async fn append_timeline(&self, event: &TimelineEvent) -> Result<(), StoreError> {
        self.db
            .process(AppendTimelineEvent {
                event: event.clone(),
            })
            .await
    }

    async fn timeline_for_job(&self, job_id: Uuid) -> Result<Vec<TimelineEvent>, StoreError> {
        self.db.process(ListTimelineForJob { job_id }).await
    }
}

#[async_trait]
impl OfferRepository for PgStore {
    async fn insert_offers(&self, offers: &[Offer]) -> Result<Vec<Offer>, StoreError> {
        self.db
            .process(InsertOffers {
                offers: offers.to_vec(),
            })
            .await
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, StoreError> {
        self.db.process(GetOfferById { id }).await
    }

    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<Offer>, StoreError> {
        self.db.process(ListOffersForJob { job_id }).await
    }

    async fn pending_offers_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Offer>, StoreError> {
        self.db
            .process(ListPendingOffersForProvider { provider_id })
            .await
    }

    async fn expired_pending_offers(&self, now: OffsetDateTime) -> Result<Vec<Offer>, StoreError> {
        self.db.process(ListExpiredPendingOffers { now }).await
    }

    async fn providers_with_pending_offers(
        &self,
        at_least: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.db.process(ListOverloadedProviders { at_least }).await
    }

    async fn resolve_offer(
        &self,
        offer_id: Uuid,
        response: OfferResponse,
        at: OffsetDateTime,
    ) -> Result<Option<Offer>, StoreError> {
        self.db
            .process(ResolveOffer {
                offer_id,
                response,
                at,
            })
            .await
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.db
            .process(InsertPayment {
                payment: payment.clone(),
            })
            .await
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.db.process(GetPaymentById { id }).await
    }

    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, StoreError> {
        self.db
            .process(GetPaymentByIntent {
                intent_id: intent_id.to_string(),
            })
            .await
    }

    async fn latest_payment_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        self.db
            .process(GetLatestPaymentForRequest { request_id })
            .await
    }

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.db
            .process(SavePayment {
                payment: payment.clone(),
            })
            .await
    }
}

#[async_trait]
impl RatingRepository for PgStore {
    async fn insert_rating(&self, rating: &Rating) -> Result<(), StoreError> {
        self.db
            .process(InsertRating {
                rating: rating.clone(),
            })
            .await
    }

    async fn ratings_for(&self, target: RatingTarget) -> Result<Vec<Rating>, StoreError> {
        self.db.process(ListRatingsForTarget { target }).await
    }
}

#[async_trait]
impl PricingRepository for PgStore {
    async fn activate_pricing_configuration(
        &self,
        configuration: &PricingConfiguration,
    ) -> Result<(), StoreError> {
        self.db
            .process(ActivatePricingConfiguration {
                configuration: configuration.clone(),
            })
            .await
    }

    async fn active_pricing_configuration(
        &self,
    ) -> Result<Option<PricingConfiguration>, StoreError> {
        self.db.process(GetActivePricingConfiguration).await
    }
}
