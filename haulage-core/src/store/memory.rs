//! In-memory adapter.
//!
//! All state sits behind one lock, so every operation, including the
//! multi-row ones, is serialisable.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AcceptOutcome, Acceptance, JobCreation, JobRepository, JobTransition, MetricsUpdate,
    OfferRepository, PaymentRepository, PricingRepository, ProviderRepository, RatingRepository,
    RequestRepository, TransitionOutcome, apply_job_status,
};
use crate::entities::{
    Job, JobStatus, Offer, OfferResponse, Payment, PricingConfiguration, Provider,
    ProviderMetrics, Rating, RatingTarget, Request, RequestPaymentStatus, RequestStatus,
    TimelineEvent,
};
use crate::error::StoreError;
use crate::geo::{BoundingBox, GeoPoint, haversine_km};

#[derive(Default)]
struct MemoryState {
    requests: HashMap<Uuid, Request>,
    providers: HashMap<Uuid, Provider>,
    jobs: HashMap<Uuid, Job>,
    timeline: HashMap<Uuid, Vec<TimelineEvent>>,
    offers: HashMap<Uuid, Offer>,
    payments: HashMap<Uuid, Payment>,
    ratings: Vec<Rating>,
    pricing: Option<PricingConfiguration>,
}

impl MemoryState {
    fn pending_offers_on_job(&self, job_id: Uuid) -> Vec<Uuid> {
        self.offers
            .values()
            .filter(|o| o.job_id == job_id && o.response == OfferResponse::Pending)
            .map(|o| o.id)
            .collect()
    }

    fn expire_offers(&mut self, ids: &[Uuid], at: OffsetDateTime) -> Vec<Offer> {
        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(offer) = self.offers.get_mut(id) {
                offer.response = OfferResponse::Expired;
                offer.responded_at = Some(at);
                expired.push(offer.clone());
            }
        }
        expired
    }

    fn set_request_status(&mut self, request_id: Uuid, status: RequestStatus, at: OffsetDateTime) {
        if let Some(request) = self.requests.get_mut(&request_id) {
            request.status = status;
            request.updated_at = at;
            if status == RequestStatus::Cancelled && request.cancelled_at.is_none() {
                request.cancelled_at = Some(at);
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestRepository for MemoryStore {
    async fn insert_request(&self, request: &Request) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state
            .requests
            .values()
            .any(|r| r.tracking_number == request.tracking_number)
        {
            return Err(StoreError::Conflict("tracking_number".into()));
        }
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<Request>, StoreError> {
        Ok(self.state.lock().requests.get(&id).cloned())
    }

    async fn request_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<Request>, StoreError> {
        Ok(self
            .state
            .lock()
            .requests
            .values()
            .find(|r| r.tracking_number.as_str() == tracking_number)
            .cloned())
    }

    async fn save_request(&self, request: &Request) -> Result<(), StoreError> {
        self.state.lock().requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn requests_for_reconciliation(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<Request>, StoreError> {
        let state = self.state.lock();
        let mut out: Vec<Request> = state
            .requests
            .values()
            .filter(|r| r.created_at >= since)
            .filter(|r| {
                matches!(
                    r.status,
                    RequestStatus::Pending
                        | RequestStatus::Bidding
                        | RequestStatus::PaymentCompleted
                ) || r.payment_status == RequestPaymentStatus::Pending
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }
}

#[async_trait]
impl ProviderRepository for MemoryStore {
    async fn upsert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        self.state
            .lock()
            .providers
            .insert(provider.id, provider.clone());
        Ok(())
    }

    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>, StoreError> {
        Ok(self.state.lock().providers.get(&id).cloned())
    }

    async fn providers_within_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Provider>, StoreError> {
        let bbox = BoundingBox::around(&center, radius_km);
        let state = self.state.lock();
        Ok(state
            .providers
            .values()
            .filter(|p| {
                p.current_location
                    .is_some_and(|loc| bbox.contains(&loc) && haversine_km(&center, &loc) <= radius_km)
            })
            .cloned()
            .collect())
    }

    async fn active_job_count(&self, provider_id: Uuid) -> Result<u32, StoreError> {
        let state = self.state.lock();
        let count = state
            .jobs
            .values()
            .filter(|j| {
                j.assigned_provider == Some(provider_id)
                    && matches!(j.status, JobStatus::Assigned | JobStatus::InTransit)
            })
            .count();
        Ok(count as u32)
    }

    async fn update_provider_metrics(
        &self,
        provider_id: Uuid,
        update: MetricsUpdate,
    ) -> Result<Option<ProviderMetrics>, StoreError> {
        let mut state = self.state.lock();
        Ok(state.providers.get_mut(&provider_id).map(|p| {
            update.apply(&mut p.metrics);
            p.metrics
        }))
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn job_for_request(&self, request_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .values()
            .find(|j| j.request_id == request_id)
            .cloned())
    }

    async fn count_jobs_with_prefix(&self, prefix: &str) -> Result<u32, StoreError> {
        let state = self.state.lock();
        Ok(state
            .jobs
            .values()
            .filter(|j| j.job_number.starts_with(prefix))
            .count() as u32)
    }

    async fn create_job_for_request(
        &self,
        job: &Job,
        request_status: RequestStatus,
        event: &TimelineEvent,
    ) -> Result<JobCreation, StoreError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.jobs.values().find(|j| j.request_id == job.request_id) {
            return Ok(JobCreation::Existing(existing.clone()));
        }
        if state.jobs.values().any(|j| j.job_number == job.job_number) {
            return Err(StoreError::Conflict("job_number".into()));
        }
        state.jobs.insert(job.id, job.clone());
        state.set_request_status(job.request_id, request_status, job.created_at);
        state.timeline.entry(job.id).or_default().push(event.clone());
        Ok(JobCreation::Created(job.clone()))
    }

    async fn transition_job(
        &self,
        transition: JobTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut state = self.state.lock();
        let Some(job) = state.jobs.get_mut(&transition.job_id) else {
            return Err(StoreError::Corrupt(format!(
                "job {} vanished during transition",
                transition.job_id
            )));
        };
        if job.status != transition.from {
            return Ok(TransitionOutcome::Stale(job.status));
        }
        apply_job_status(job, transition.to, transition.at);
        let job = job.clone();

        let expired_offers = if transition.expire_pending_offers {
            let ids = state.pending_offers_on_job(job.id);
            state.expire_offers(&ids, transition.at)
        } else {
            Vec::new()
        };
        if let Some((request_id, status)) = transition.request_status {
            state.set_request_status(request_id, status, transition.at);
        }
        state
            .timeline
            .entry(job.id)
            .or_default()
            .push(transition.event);
        Ok(TransitionOutcome::Applied {
            job,
            expired_offers,
        })
    }

    async fn commit_acceptance(&self, acceptance: Acceptance) -> Result<AcceptOutcome, StoreError> {
        let mut state = self.state.lock();
        let offer_open = state.offers.get(&acceptance.offer_id).is_some_and(|o| {
            o.job_id == acceptance.job_id && o.is_open(acceptance.at)
        });
        if !offer_open {
            return Ok(AcceptOutcome::OfferUnavailable);
        }
        let job_open = state
            .jobs
            .get(&acceptance.job_id)
            .is_some_and(Job::is_open);
        let request_open = state.requests.get(&acceptance.request_id).is_some_and(|r| {
            matches!(
                r.status,
                RequestStatus::Pending | RequestStatus::Bidding | RequestStatus::Accepted
            )
        });
        if !job_open || !request_open {
            return Ok(AcceptOutcome::JobUnavailable);
        }

        let Some(offer) = state.offers.get_mut(&acceptance.offer_id) else {
            return Ok(AcceptOutcome::OfferUnavailable);
        };
        offer.response = OfferResponse::Accepted;
        offer.responded_at = Some(acceptance.at);
        let offer = offer.clone();

        let Some(job) = state.jobs.get_mut(&acceptance.job_id) else {
            return Ok(AcceptOutcome::JobUnavailable);
        };
        job.assigned_provider = Some(offer.provider_id);
        apply_job_status(job, JobStatus::Assigned, acceptance.at);
        let job = job.clone();

        let siblings = state.pending_offers_on_job(job.id);
        let expired_offers = state.expire_offers(&siblings, acceptance.at);
        state.set_request_status(acceptance.request_id, RequestStatus::Assigned, acceptance.at);
        state
            .timeline
            .entry(job.id)
            .or_default()
            .push(acceptance.event);

        Ok(AcceptOutcome::Accepted {
            job,
            offer,
            expired_offers,
        })
    }

    async fn append_timeline(&self, event: &TimelineEvent) -> Result<(), StoreError> {
        self.state
            .lock()
            .timeline
            .entry(event.job_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn timeline_for_job(&self, job_id: Uuid) -> Result<Vec<TimelineEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .timeline
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl OfferRepository for MemoryStore {
    async fn insert_offers(&self, offers: &[Offer]) -> Result<Vec<Offer>, StoreError> {
        let mut state = self.state.lock();
        let mut written = Vec::with_capacity(offers.len());
        for offer in offers {
            let taken = state
                .offers
                .values()
                .any(|o| o.job_id == offer.job_id && o.provider_id == offer.provider_id);
            if taken {
                continue;
            }
            state.offers.insert(offer.id, offer.clone());
            written.push(offer.clone());
        }
        Ok(written)
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(self.state.lock().offers.get(&id).cloned())
    }

    async fn offers_for_job(&self, job_id: Uuid) -> Result<Vec<Offer>, StoreError> {
        let state = self.state.lock();
        let mut out: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| o.job_id == job_id)
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.rank, o.created_at));
        Ok(out)
    }

    async fn pending_offers_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Offer>, StoreError> {
        let state = self.state.lock();
        let mut out: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| o.provider_id == provider_id && o.response == OfferResponse::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.created_at, o.id));
        Ok(out)
    }

    async fn expired_pending_offers(&self, now: OffsetDateTime) -> Result<Vec<Offer>, StoreError> {
        let state = self.state.lock();
        let mut out: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| o.response == OfferResponse::Pending && o.expires_at < now)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.expires_at);
        Ok(out)
    }

    async fn providers_with_pending_offers(
        &self,
        at_least: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock();
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for offer in state.offers.values() {
            if offer.response == OfferResponse::Pending {
                *counts.entry(offer.provider_id).or_default() += 1;
            }
        }
        let mut out: Vec<Uuid> = counts
            .into_iter()
            .filter(|(_, n)| *n >= at_least)
            .map(|(id, _)| id)
            .collect();
        out.sort();
        Ok(out)
    }

    async fn resolve_offer(
        &self,
        offer_id: Uuid,
        response: OfferResponse,
        at: OffsetDateTime,
    ) -> Result<Option<Offer>, StoreError> {
        let mut state = self.state.lock();
        let Some(offer) = state.offers.get_mut(&offer_id) else {
            return Ok(None);
        };
        if offer.response != OfferResponse::Pending {
            return Ok(None);
        }
        offer.response = response;
        offer.responded_at = Some(at);
        Ok(Some(offer.clone()))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state
            .payments
            .values()
            .any(|p| p.reference == payment.reference)
        {
            return Err(StoreError::Conflict("payment reference".into()));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.lock().payments.get(&id).cloned())
    }

    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .payments
            .values()
            .find(|p| p.intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn latest_payment_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .payments
            .values()
            .filter(|p| p.request_id == request_id)
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.state
            .lock()
            .payments
            .insert(payment.id, payment.clone());
        Ok(())
    }
}

#[async_trait]
impl RatingRepository for MemoryStore {
    async fn insert_rating(&self, rating: &Rating) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state
            .ratings
            .iter()
            .any(|r| r.target == rating.target && r.rater == rating.rater)
        {
            return Err(StoreError::Conflict("rating".into()));
        }
        state.ratings.push(rating.clone());
        Ok(())
    }

    async fn ratings_for(&self, target: RatingTarget) -> Result<Vec<Rating>, StoreError> {
        Ok(self
            .state
            .lock()
            .ratings
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PricingRepository for MemoryStore {
    async fn activate_pricing_configuration(
        &self,
        configuration: &PricingConfiguration,
    ) -> Result<(), StoreError> {
        self.state.lock().pricing = Some(configuration.clone());
        Ok(())
    }

    async fn active_pricing_configuration(
        &self,
    ) -> Result<Option<PricingConfiguration>, StoreError> {
        Ok(self.state.lock().pricing.clone())
    }
}
