//! Offer fan-out, first-accept-wins arbitration, expiry, escalation and
//! load shaping.

use std::collections::{HashMap, HashSet};

use haulage_sdk::objects::{NotificationChannel, NotificationPayload};
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Engine;
use super::matcher::ScoreBreakdown;
use crate::clock::OpContext;
use crate::entities::{
    Job, JobStatus, Offer, OfferResponse, Provider, Request, RequestPriority, RequestStatus,
    TimelineEvent, TimelineEventType,
};
use crate::error::DispatchError;
use crate::events::{AutoAssignRequest, DomainEvent};
use crate::geo::estimate_duration_minutes;
use crate::pricing::round_money;
use crate::store::{AcceptOutcome, Acceptance, MetricsUpdate};

const URGENT_MULTIPLIER: Decimal = Decimal::from_parts(13, 0, 0, false, 1);
const HIGH_MULTIPLIER: Decimal = Decimal::from_parts(115, 0, 0, false, 2);
const PEAK_MULTIPLIER: Decimal = Decimal::from_parts(12, 0, 0, false, 1);

/// 07:00-09:00 and 17:00-19:00 local.
pub fn is_peak_hour(hour: u8) -> bool {
    (7..9).contains(&hour) || (17..19).contains(&hour)
}

/// What a provider is offered for a job `distance_km` away.
pub fn offer_price(
    base_price: Decimal,
    distance_km: f64,
    priority: RequestPriority,
    local_hour: u8,
    per_km_rate: Decimal,
) -> Decimal {
    let km = Decimal::from_f64(distance_km.max(0.0))
        .unwrap_or_default()
        .round_dp(2);
    let mut price = base_price + km * per_km_rate;
    match priority {
        RequestPriority::Urgent => price *= URGENT_MULTIPLIER,
        RequestPriority::High => price *= HIGH_MULTIPLIER,
        _ => {}
    }
    if is_peak_hour(local_hour) {
        price *= PEAK_MULTIPLIER;
    }
    round_money(price)
}

/// Result of one dispatch round for a job.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Offers created in this round.
    pub offers: Vec<Offer>,
    pub escalated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: usize,
    /// Offers shed from overloaded providers.
    pub rebalanced: usize,
    /// Jobs that received fresh offers.
    pub redispatched: usize,
    pub escalated: usize,
}

impl Engine {
    /// Offer an open job to the best providers not offered yet, up to the
    /// fan-out cap. Escalates when nobody is left.
    pub async fn dispatch_job(
        &self,
        ctx: &OpContext,
        job_id: Uuid,
    ) -> Result<DispatchOutcome, DispatchError> {
        let _guard = self.job_locks.acquire(&job_id).await?;
        self.dispatch_locked(ctx, job_id).await
    }

    async fn dispatch_locked(
        &self,
        ctx: &OpContext,
        job_id: Uuid,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job = self.load_job(job_id).await?;
        if !job.is_open() {
            debug!(%job_id, status = %job.status, "Job not open, skipping dispatch");
            return Ok(DispatchOutcome::default());
        }
        let request = self.load_request(job.request_id).await?;
        let settings = &self.settings.dispatch;
        let now = ctx.now();

        let existing = self.store.offers_for_job(job_id).await?;
        let open = existing.iter().filter(|o| o.is_open(now)).count();
        let slots = settings.max_candidates.saturating_sub(open);
        if slots == 0 {
            return Ok(DispatchOutcome::default());
        }
        let offered: HashSet<Uuid> = existing.iter().map(|o| o.provider_id).collect();
        let mut candidates = self.find_candidates(ctx, &request, &offered).await?;
        candidates.truncate(slots);

        if candidates.is_empty() {
            if open > 0 {
                return Ok(DispatchOutcome::default());
            }
            self.escalate(ctx, &job, "no eligible providers left").await?;
            return Ok(DispatchOutcome {
                offers: Vec::new(),
                escalated: true,
            });
        }

        let hour = ctx.clock.local_now().hour();
        let mut rank = existing.iter().map(|o| o.rank).max().unwrap_or(0);
        let mut recipients = HashMap::with_capacity(candidates.len());
        let offers: Vec<Offer> = candidates
            .iter()
            .map(|c| {
                rank += 1;
                recipients.insert(c.provider.id, c.provider.user_id);
                self.build_offer(&job, &request, c.provider.id, c.distance_km, c.score, rank, now, hour)
            })
            .collect();
        let offers = self.store.insert_offers(&offers).await?;
        if offers.is_empty() {
            return Ok(DispatchOutcome::default());
        }

        for offer in &offers {
            self.notify(
                recipients.get(&offer.provider_id).copied(),
                NotificationChannel::Push,
                NotificationPayload::JobOffered {
                    offer_id: offer.id,
                    job_number: job.job_number.to_string(),
                    offered_price: offer.offered_price,
                    distance_km: offer.distance_km,
                    expires_at: offer.expires_at,
                },
            );
        }
        let offer_ids: Vec<Uuid> = offers.iter().map(|o| o.id).collect();
        let provider_ids: Vec<Uuid> = offers.iter().map(|o| o.provider_id).collect();
        self.store
            .append_timeline(&TimelineEvent::new(
                job_id,
                TimelineEventType::OffersDispatched,
                format!("Offered to {} provider(s)", offers.len()),
                json!({ "offer_ids": offer_ids, "provider_ids": provider_ids }),
                now,
                ctx.actor,
            ))
            .await?;
        info!(%job_id, job_number = %job.job_number, count = offers.len(), "Offers dispatched");
        self.bus.publish(DomainEvent::OffersDispatched { job_id, offer_ids });
        Ok(DispatchOutcome {
            offers,
            escalated: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_offer(
        &self,
        job: &Job,
        request: &Request,
        provider_id: Uuid,
        distance_km: f64,
        score: f64,
        rank: u32,
        now: OffsetDateTime,
        local_hour: u8,
    ) -> Offer {
        let settings = &self.settings.dispatch;
        Offer {
            id: Uuid::now_v7(),
            job_id: job.id,
            provider_id,
            offered_price: offer_price(
                request.base_price.unwrap_or(job.price),
                distance_km,
                request.priority,
                local_hour,
                settings.per_km_rate,
            ),
            distance_km,
            estimated_duration_minutes: estimate_duration_minutes(distance_km),
            score,
            rank,
            created_at: now,
            expires_at: now + settings.offer_timeout,
            response: OfferResponse::Pending,
            responded_at: None,
        }
    }

    async fn escalate(&self, ctx: &OpContext, job: &Job, reason: &str) -> Result<(), DispatchError> {
        let urgent = job.priority == RequestPriority::Urgent;
        self.alert(
            format!("Job {} needs attention", job.job_number),
            reason.to_string(),
            Some(job.id),
        );
        self.store
            .append_timeline(&TimelineEvent::new(
                job.id,
                TimelineEventType::Escalated,
                format!("Escalated: {reason}"),
                json!({ "reason": reason, "urgent": urgent }),
                ctx.now(),
                ctx.actor,
            ))
            .await?;
        if urgent {
            let scheduled = self.bus.schedule_auto_assign(AutoAssignRequest {
                job_id: job.id,
                delay: self.settings.dispatch.auto_assign_delay,
            });
            if !scheduled {
                warn!(job_id = %job.id, "Auto-assign queue rejected urgent job");
            }
        }
        Ok(())
    }

    async fn notify_provider(&self, provider_id: Uuid, payload: NotificationPayload) {
        match self.store.get_provider(provider_id).await {
            Ok(Some(provider)) => {
                self.notify(Some(provider.user_id), NotificationChannel::Push, payload)
            }
            Ok(None) => warn!(%provider_id, "Cannot notify unknown provider"),
            Err(e) => warn!(%provider_id, error = %e, "Cannot load provider for notification"),
        }
    }

    /// Tell providers their offers on `job` are gone.
    pub(super) async fn withdraw_offers(&self, job: &Job, offers: &[Offer]) {
        for offer in offers {
            self.notify_provider(
                offer.provider_id,
                NotificationPayload::OfferWithdrawn {
                    offer_id: offer.id,
                    job_number: job.job_number.to_string(),
                },
            )
            .await;
            self.bus.publish(DomainEvent::OfferResolved {
                offer_id: offer.id,
                job_id: job.id,
                provider_id: offer.provider_id,
                response: OfferResponse::Expired,
            });
        }
    }

    /// A provider answers an offer. Returns the offer as resolved.
    pub async fn respond_to_offer(
        &self,
        ctx: &OpContext,
        offer_id: Uuid,
        provider_id: Uuid,
        accept: bool,
    ) -> Result<Offer, DispatchError> {
        let offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("offer", offer_id))?;
        if offer.provider_id != provider_id {
            return Err(DispatchError::invalid("offer belongs to another provider"));
        }
        let now = ctx.now();
        if offer.is_open(now) {
            let minutes = (now - offer.created_at).as_seconds_f64() / 60.0;
            self.fold_metrics(provider_id, MetricsUpdate::ResponseMinutes(minutes))
                .await;
        }
        if accept {
            let (_, offer) = self.accept_offer(ctx, offer).await?;
            Ok(offer)
        } else {
            self.decline_offer(ctx, offer).await
        }
    }

    async fn accept_offer(&self, ctx: &OpContext, offer: Offer) -> Result<(Job, Offer), DispatchError> {
        let request_id = self.load_job(offer.job_id).await?.request_id;
        let _request_guard = self.request_locks.acquire(&request_id).await?;
        let _job_guard = self.job_locks.acquire(&offer.job_id).await?;
        let job = self.load_job(offer.job_id).await?;
        self.commit_offer(ctx, &job, offer).await
    }

    /// Atomically hand `job` to the offer's provider. The caller holds the
    /// request and job locks.
    async fn commit_offer(
        &self,
        ctx: &OpContext,
        job: &Job,
        offer: Offer,
    ) -> Result<(Job, Offer), DispatchError> {
        let mut request = self.load_request(job.request_id).await?;
        let now = ctx.now();
        let event = TimelineEvent::status_change(
            job.id,
            JobStatus::Pending,
            JobStatus::Assigned,
            json!({ "offer_id": offer.id, "provider_id": offer.provider_id }),
            now,
            ctx.actor,
        );
        let outcome = self
            .store
            .commit_acceptance(Acceptance {
                job_id: job.id,
                offer_id: offer.id,
                request_id: request.id,
                at: now,
                event,
            })
            .await?;

        match outcome {
            AcceptOutcome::Accepted {
                job,
                offer,
                expired_offers,
            } => {
                info!(
                    job_id = %job.id,
                    job_number = %job.job_number,
                    provider_id = %offer.provider_id,
                    "Job assigned"
                );
                self.bus.publish(DomainEvent::OfferResolved {
                    offer_id: offer.id,
                    job_id: job.id,
                    provider_id: offer.provider_id,
                    response: OfferResponse::Accepted,
                });
                self.bus.publish(DomainEvent::JobStatusChanged {
                    job_id: job.id,
                    previous: JobStatus::Pending,
                    new: JobStatus::Assigned,
                });
                self.bus.publish(DomainEvent::RequestStatusChanged {
                    request_id: request.id,
                    previous: request.status,
                    new: RequestStatus::Assigned,
                });
                self.withdraw_offers(&job, &expired_offers).await;
                self.notify_provider(
                    offer.provider_id,
                    NotificationPayload::JobStatusChanged {
                        job_number: job.job_number.to_string(),
                        status: JobStatus::Assigned.into(),
                        reason: None,
                    },
                )
                .await;
                request.status = RequestStatus::Assigned;
                self.notify_customer(&request);
                Ok((job, offer))
            }
            AcceptOutcome::JobUnavailable | AcceptOutcome::OfferUnavailable => {
                let response = if matches!(outcome, AcceptOutcome::OfferUnavailable)
                    && offer.response == OfferResponse::Pending
                    && offer.expires_at < now
                {
                    OfferResponse::Expired
                } else {
                    OfferResponse::Declined
                };
                if let Some(resolved) = self.store.resolve_offer(offer.id, response, now).await? {
                    self.bus.publish(DomainEvent::OfferResolved {
                        offer_id: resolved.id,
                        job_id: resolved.job_id,
                        provider_id: resolved.provider_id,
                        response,
                    });
                }
                self.notify_provider(
                    offer.provider_id,
                    NotificationPayload::JobNoLongerAvailable {
                        offer_id: offer.id,
                        job_number: job.job_number.to_string(),
                    },
                )
                .await;
                info!(job_id = %job.id, offer_id = %offer.id, "Late acceptance turned down");
                Err(DispatchError::StaleAssignment { job_id: job.id })
            }
        }
    }

    async fn decline_offer(&self, ctx: &OpContext, offer: Offer) -> Result<Offer, DispatchError> {
        let now = ctx.now();
        let Some(declined) = self
            .store
            .resolve_offer(offer.id, OfferResponse::Declined, now)
            .await?
        else {
            return Err(DispatchError::InvalidTransition {
                entity: "offer",
                from: offer.response.to_string(),
                action: "decline",
            });
        };
        self.bus.publish(DomainEvent::OfferResolved {
            offer_id: declined.id,
            job_id: declined.job_id,
            provider_id: declined.provider_id,
            response: OfferResponse::Declined,
        });

        let job = self.load_job(declined.job_id).await?;
        if job.is_open() {
            let offers = self.store.offers_for_job(job.id).await?;
            if !offers.iter().any(|o| o.is_open(now)) {
                if let Err(e) = self.dispatch_job(ctx, job.id).await {
                    warn!(job_id = %job.id, error = %e, "Redispatch after decline failed");
                }
            }
        }
        Ok(declined)
    }

    /// Expire overdue offers, refill or escalate their jobs, then shed load
    /// from overloaded providers.
    pub async fn sweep_expired_offers(&self, ctx: &OpContext) -> Result<SweepSummary, DispatchError> {
        let now = ctx.now();
        let mut summary = SweepSummary::default();

        let mut expired = Vec::new();
        for offer in self.store.expired_pending_offers(now).await? {
            ctx.cancel.check()?;
            if let Some(offer) = self
                .store
                .resolve_offer(offer.id, OfferResponse::Expired, now)
                .await?
            {
                expired.push(offer);
            }
        }
        summary.expired = expired.len();
        self.refill(ctx, expired, &mut summary).await?;

        let shed = self.rebalance(ctx).await?;
        summary.rebalanced = shed.len();
        self.refill(ctx, shed, &mut summary).await?;

        if summary != SweepSummary::default() {
            info!(
                expired = summary.expired,
                rebalanced = summary.rebalanced,
                redispatched = summary.redispatched,
                escalated = summary.escalated,
                "Offer sweep complete"
            );
        }
        Ok(summary)
    }

    /// Withdraw `offers` and redispatch their jobs that are still open.
    async fn refill(
        &self,
        ctx: &OpContext,
        offers: Vec<Offer>,
        summary: &mut SweepSummary,
    ) -> Result<(), DispatchError> {
        let by_job = offers.into_iter().into_group_map_by(|o| o.job_id);
        for (job_id, offers) in by_job {
            ctx.cancel.check()?;
            let Some(job) = self.store.get_job(job_id).await? else {
                continue;
            };
            self.withdraw_offers(&job, &offers).await;
            if !job.is_open() {
                continue;
            }
            match self.dispatch_job(ctx, job_id).await {
                Ok(outcome) if outcome.escalated => summary.escalated += 1,
                Ok(outcome) if !outcome.offers.is_empty() => summary.redispatched += 1,
                Ok(_) => {}
                Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
                Err(e) => warn!(%job_id, error = %e, "Redispatch failed"),
            }
        }
        Ok(())
    }

    /// Expire all but the best-scored few pending offers of providers
    /// holding too many. Equal scores keep the older offer.
    async fn rebalance(&self, ctx: &OpContext) -> Result<Vec<Offer>, DispatchError> {
        let settings = &self.settings.dispatch;
        let now = ctx.now();
        let mut shed = Vec::new();
        for provider_id in self
            .store
            .providers_with_pending_offers(settings.rebalance_threshold)
            .await?
        {
            ctx.cancel.check()?;
            let mut pending = self.store.pending_offers_for_provider(provider_id).await?;
            pending.sort_by(|a, b| b.score.total_cmp(&a.score));
            for offer in pending.into_iter().skip(settings.rebalance_keep) {
                if let Some(offer) = self
                    .store
                    .resolve_offer(offer.id, OfferResponse::Expired, now)
                    .await?
                {
                    debug!(%provider_id, offer_id = %offer.id, "Offer shed");
                    shed.push(offer);
                }
            }
        }
        Ok(shed)
    }

    /// Assign an escalated job to its best open offer, or failing that to
    /// the top candidate from one more matcher run. `None` when the job was
    /// taken meanwhile or nobody could be found.
    pub async fn auto_assign(&self, ctx: &OpContext, job_id: Uuid) -> Result<Option<Job>, DispatchError> {
        let request_id = self.load_job(job_id).await?.request_id;
        let _request_guard = self.request_locks.acquire(&request_id).await?;
        let _job_guard = self.job_locks.acquire(&job_id).await?;
        let job = self.load_job(job_id).await?;
        if !job.is_open() {
            debug!(%job_id, status = %job.status, "Job no longer open, skipping auto-assign");
            return Ok(None);
        }
        let now = ctx.now();
        let offers = self.store.offers_for_job(job_id).await?;
        let best = offers
            .iter()
            .filter(|o| o.is_open(now))
            .min_by_key(|o| o.rank)
            .cloned();

        let offer = match best {
            Some(offer) => offer,
            None => {
                let request = self.load_request(request_id).await?;
                // none of these is open: answered, or past its deadline and not yet swept
                let offered: HashSet<Uuid> = offers.iter().map(|o| o.provider_id).collect();
                let mut offer = None;
                for c in self.find_candidates(ctx, &request, &offered).await? {
                    offer = self
                        .single_offer(ctx, &job, &request, &c.provider, c.distance_km, c.score)
                        .await?;
                    if offer.is_some() {
                        break;
                    }
                }
                match offer {
                    Some(offer) => offer,
                    None => {
                        self.alert(
                            format!("Auto-assign failed for job {}", job.job_number),
                            "no open offers and no eligible providers",
                            Some(job_id),
                        );
                        return Ok(None);
                    }
                }
            }
        };

        match self.commit_offer(ctx, &job, offer).await {
            Ok((job, _)) => Ok(Some(job)),
            Err(DispatchError::StaleAssignment { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Assign `provider` to an open job without a dispatch round. The
    /// caller holds the request lock.
    pub(super) async fn assign_directly(
        &self,
        ctx: &OpContext,
        job_id: Uuid,
        request: &Request,
        provider: &Provider,
    ) -> Result<Job, DispatchError> {
        if !provider.verification_status.is_verified() {
            return Err(DispatchError::invalid("provider is not verified"));
        }
        let _guard = self.job_locks.acquire(&job_id).await?;
        let job = self.load_job(job_id).await?;
        if !job.is_open() {
            return Err(DispatchError::InvalidTransition {
                entity: "job",
                from: job.status.to_string(),
                action: "assign",
            });
        }
        let distance_km = match (provider.current_location, request.pickup()) {
            (Some(at), Some(pickup)) => at.distance_km(&pickup.location),
            _ => 0.0,
        };
        let score = ScoreBreakdown::compute(provider, distance_km, request.is_urgent()).total();
        let offer = self
            .single_offer(ctx, &job, request, provider, distance_km, score)
            .await?
            .ok_or_else(|| DispatchError::invalid("provider already answered an offer for this job"))?;
        let (job, _) = self.commit_offer(ctx, &job, offer).await?;
        Ok(job)
    }

    /// An open offer of `job` to `provider`, reusing one already pending.
    async fn single_offer(
        &self,
        ctx: &OpContext,
        job: &Job,
        request: &Request,
        provider: &Provider,
        distance_km: f64,
        score: f64,
    ) -> Result<Option<Offer>, DispatchError> {
        let now = ctx.now();
        let existing = self.store.offers_for_job(job.id).await?;
        if let Some(offer) = existing.iter().find(|o| o.provider_id == provider.id) {
            return Ok(offer.is_open(now).then(|| offer.clone()));
        }
        let rank = existing.iter().map(|o| o.rank).max().unwrap_or(0) + 1;
        let hour = ctx.clock.local_now().hour();
        let offer = self.build_offer(job, request, provider.id, distance_km, score, rank, now, hour);
        Ok(self.store.insert_offers(&[offer]).await?.into_iter().next())
    }
}
