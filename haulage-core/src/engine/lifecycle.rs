//! Request editing, submission and settlement; job creation and the job
//! state machine.

use compact_str::CompactString;
use haulage_sdk::objects::{NotificationChannel, NotificationPayload};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::json;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Engine, rfc3339};
use crate::clock::{Actor, OpContext};
use crate::entities::{
    InsuranceRequest, Item, Job, JobStatus, Offer, Payment, PaymentStatus, PropertyDetails,
    Request, RequestPaymentStatus, RequestPriority, RequestStatus, RequestType, ServiceLevel,
    Stop, StopType, TimelineEvent, TimelineEventType,
};
use crate::error::{DispatchError, StoreError};
use crate::events::DomainEvent;
use crate::geo::{GeoPoint, path_length_km};
use crate::ids;
use crate::pricing::{PriceQuote, round_money};
use crate::store::{JobCreation, JobTransition, MetricsUpdate, TransitionOutcome};

const TRACKING_NUMBER_ATTEMPTS: u32 = 5;
const RANDOM_JOB_NUMBER_ATTEMPTS: u32 = 10;
/// Furthest ahead an express pickup may be booked.
const EXPRESS_WINDOW_DAYS: i64 = 2;

/// Fields a customer supplies when opening a request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub user_id: Uuid,
    pub request_type: RequestType,
    pub priority: RequestPriority,
    pub service_level: ServiceLevel,
    pub pickup_date: Date,
    pub estimated_weight_kg: Option<Decimal>,
    pub estimated_distance_km: Option<Decimal>,
    pub estimated_price: Option<Decimal>,
    pub required_category: Option<CompactString>,
    pub property: Option<PropertyDetails>,
    pub insurance: Option<InsuranceRequest>,
    pub staff_count: u8,
    pub city: Option<String>,
}

impl NewRequest {
    pub fn new(user_id: Uuid, request_type: RequestType, pickup_date: Date) -> Self {
        Self {
            user_id,
            request_type,
            priority: RequestPriority::Standard,
            service_level: ServiceLevel::Standard,
            pickup_date,
            estimated_weight_kg: None,
            estimated_distance_km: None,
            estimated_price: None,
            required_category: None,
            property: None,
            insurance: None,
            staff_count: 0,
            city: None,
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        let negative = |v: Option<Decimal>| v.is_some_and(|v| v.is_sign_negative());
        if negative(self.estimated_weight_kg) {
            return Err(DispatchError::invalid("estimated weight must not be negative"));
        }
        if negative(self.estimated_distance_km) {
            return Err(DispatchError::invalid("estimated distance must not be negative"));
        }
        if negative(self.estimated_price) {
            return Err(DispatchError::invalid("estimated price must not be negative"));
        }
        if self
            .insurance
            .is_some_and(|i| i.declared_value.is_sign_negative())
        {
            return Err(DispatchError::invalid("declared value must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewStop {
    pub stop_type: StopType,
    pub location: GeoPoint,
    pub address: String,
    pub scheduled_at: Option<OffsetDateTime>,
    pub instructions: Option<String>,
}

impl NewStop {
    pub fn new(stop_type: StopType, location: GeoPoint, address: impl Into<String>) -> Self {
        Self {
            stop_type,
            location,
            address: address.into(),
            scheduled_at: None,
            instructions: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewItem {
    /// Pickup stop the item is collected from.
    pub stop_id: Option<Uuid>,
    pub name: String,
    pub quantity: u32,
    pub weight_kg: Decimal,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    pub fragile: bool,
    pub needs_disassembly: bool,
    pub declared_value: Option<Decimal>,
}

/// Pickup date rules: never in the past, same-day means today, express
/// within two days.
pub fn validate_pickup_date(request: &Request, today: Date) -> Result<(), DispatchError> {
    let date = request.pickup_date;
    if date < today {
        return Err(DispatchError::invalid(format!(
            "pickup date {date} is in the past"
        )));
    }
    let same_day = request.service_level == ServiceLevel::SameDay
        || request.priority == RequestPriority::SameDay;
    if same_day && date != today {
        return Err(DispatchError::invalid("same-day requests must be picked up today"));
    }
    let express = request.service_level == ServiceLevel::Express
        || request.priority == RequestPriority::Express;
    if express && date > today + time::Duration::days(EXPRESS_WINDOW_DAYS) {
        return Err(DispatchError::invalid(format!(
            "express requests must be picked up within {EXPRESS_WINDOW_DAYS} days"
        )));
    }
    Ok(())
}

fn check_stops(request: &Request) -> Result<(), DispatchError> {
    if request.request_type == RequestType::Journey {
        if request.stops.len() < 2 {
            return Err(DispatchError::invalid("a journey needs at least two stops"));
        }
        return Ok(());
    }
    if request.pickup().is_none() || request.dropoff().is_none() {
        return Err(DispatchError::invalid(
            "a request needs a pickup and a dropoff stop",
        ));
    }
    Ok(())
}

fn ensure_draft(request: &Request, action: &'static str) -> Result<(), DispatchError> {
    if request.status != RequestStatus::Draft {
        return Err(DispatchError::InvalidTransition {
            entity: "request",
            from: request.status.to_string(),
            action,
        });
    }
    Ok(())
}

/// What the provider is paid: the customer price less the platform fee.
pub(crate) fn job_price(base_price: Decimal, platform_fee_percentage: Decimal) -> Decimal {
    round_money(base_price * (Decimal::ONE - platform_fee_percentage / Decimal::ONE_HUNDRED))
}

fn job_action(to: JobStatus) -> &'static str {
    match to {
        JobStatus::Draft => "reset",
        JobStatus::Pending => "open",
        JobStatus::Assigned => "assign",
        JobStatus::InTransit => "start transit",
        JobStatus::Completed => "complete",
        JobStatus::Cancelled => "cancel",
    }
}

impl Engine {
    pub async fn create_draft(
        &self,
        ctx: &OpContext,
        new: NewRequest,
    ) -> Result<Request, DispatchError> {
        new.validate()?;
        let now = ctx.now();
        let mut request = Request {
            id: Uuid::now_v7(),
            request_code: ids::new_request_id(ctx.today()),
            tracking_number: ids::new_tracking_number(),
            user_id: new.user_id,
            request_type: new.request_type,
            priority: new.priority,
            service_level: new.service_level,
            status: RequestStatus::Draft,
            payment_status: RequestPaymentStatus::Pending,
            pickup_date: new.pickup_date,
            stops: Vec::new(),
            items: Vec::new(),
            estimated_weight_kg: new.estimated_weight_kg,
            estimated_distance_km: new.estimated_distance_km,
            estimated_price: new.estimated_price,
            required_category: new.required_category,
            property: new.property,
            insurance: new.insurance,
            staff_count: new.staff_count,
            city: new.city,
            base_price: None,
            pricing_version: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };

        for attempt in 0..TRACKING_NUMBER_ATTEMPTS {
            match self.store.insert_request(&request).await {
                Ok(()) => {
                    info!(
                        request_id = %request.id,
                        tracking_number = %request.tracking_number,
                        "Draft request created"
                    );
                    return Ok(request);
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(attempt, "Tracking number collision, retrying");
                    request.tracking_number = ids::new_tracking_number();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict("tracking_number".to_string()).into())
    }

    pub async fn add_stop(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        stop: NewStop,
    ) -> Result<Request, DispatchError> {
        if !stop.location.is_valid() {
            return Err(DispatchError::invalid("stop location is out of range"));
        }
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        ensure_draft(&request, "add a stop")?;

        request.stops.push(Stop {
            id: Uuid::now_v7(),
            sequence: request.stops.len() as u32,
            stop_type: stop.stop_type,
            location: stop.location,
            address: stop.address,
            scheduled_at: stop.scheduled_at,
            instructions: stop.instructions,
        });
        request.updated_at = ctx.now();
        self.store.save_request(&request).await?;
        Ok(request)
    }

    /// Remove a stop and renumber the rest densely. Items collected at the
    /// stop are kept but detached from it.
    pub async fn remove_stop(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        stop_id: Uuid,
    ) -> Result<Request, DispatchError> {
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        ensure_draft(&request, "remove a stop")?;

        let Some(index) = request.stops.iter().position(|s| s.id == stop_id) else {
            return Err(DispatchError::not_found("stop", stop_id));
        };
        request.stops.remove(index);
        request.renumber_stops();
        for item in request.items.iter_mut() {
            if item.stop_id == Some(stop_id) {
                item.stop_id = None;
            }
        }
        request.updated_at = ctx.now();
        self.store.save_request(&request).await?;
        Ok(request)
    }

    pub async fn add_item(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        item: NewItem,
    ) -> Result<Request, DispatchError> {
        if item.quantity == 0 {
            return Err(DispatchError::invalid("item quantity must be at least 1"));
        }
        let measures = [item.weight_kg, item.length_cm, item.width_cm, item.height_cm];
        if measures.iter().any(|m| m.is_sign_negative()) {
            return Err(DispatchError::invalid("item weight and dimensions must not be negative"));
        }
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        ensure_draft(&request, "add an item")?;

        if let Some(stop_id) = item.stop_id {
            let at_pickup = request
                .stops
                .iter()
                .any(|s| s.id == stop_id && s.stop_type == StopType::Pickup);
            if !at_pickup {
                return Err(DispatchError::invalid(
                    "items can only be attached to a pickup stop of the same request",
                ));
            }
        }
        request.items.push(Item {
            id: Uuid::now_v7(),
            stop_id: item.stop_id,
            name: item.name,
            quantity: item.quantity,
            weight_kg: item.weight_kg,
            length_cm: item.length_cm,
            width_cm: item.width_cm,
            height_cm: item.height_cm,
            fragile: item.fragile,
            needs_disassembly: item.needs_disassembly,
            declared_value: item.declared_value,
        });
        request.updated_at = ctx.now();
        self.store.save_request(&request).await?;
        Ok(request)
    }

    /// Declared distance, else the geo oracle over the ordered stops, else
    /// the great-circle path.
    async fn resolve_distance(&self, request: &Request) -> Result<Decimal, DispatchError> {
        if let Some(distance) = request.estimated_distance_km {
            return Ok(distance);
        }
        let route = request.route();
        let km = match self.geo.distance_and_duration(&route).await {
            Ok(estimate) => estimate.distance_km(),
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Route lookup failed, using straight-line distance");
                path_length_km(&route)
            }
        };
        Decimal::from_f64(km)
            .map(|d| d.round_dp(2))
            .ok_or_else(|| DispatchError::invalid("route distance is not a finite number"))
    }

    /// `draft -> pending`: validate, price and store the quote.
    pub async fn submit(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
    ) -> Result<(Request, PriceQuote), DispatchError> {
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        ensure_draft(&request, "submit")?;
        check_stops(&request)?;
        validate_pickup_date(&request, ctx.today())?;

        let distance_km = self.resolve_distance(&request).await?;
        let quote = self
            .pricing
            .quote_request(ctx, &request, distance_km)
            .await?;

        let now = ctx.now();
        request.estimated_distance_km = Some(distance_km);
        request.base_price = Some(quote.final_price);
        request.pricing_version = Some(quote.config_version);
        request.status = RequestStatus::Pending;
        request.payment_status = RequestPaymentStatus::Pending;
        request.submitted_at = Some(now);
        request.updated_at = now;
        self.store.save_request(&request).await?;

        info!(
            request_id = %request.id,
            tracking_number = %request.tracking_number,
            base_price = %quote.final_price,
            weather = quote.breakdown.weather.label(),
            "Request submitted"
        );
        self.bus.publish(DomainEvent::RequestSubmitted {
            request_id: request.id,
            tracking_number: request.tracking_number.clone(),
            base_price: quote.final_price,
        });
        self.bus.publish(DomainEvent::RequestStatusChanged {
            request_id: request.id,
            previous: RequestStatus::Draft,
            new: RequestStatus::Pending,
        });
        self.notify_customer(&request);
        Ok((request, quote))
    }

    /// `pending -> bidding` for biddable requests.
    pub async fn open_bidding(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
    ) -> Result<Request, DispatchError> {
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        if request.request_type != RequestType::Biddable {
            return Err(DispatchError::invalid("only biddable requests take bids"));
        }
        if request.status != RequestStatus::Pending {
            return Err(DispatchError::InvalidTransition {
                entity: "request",
                from: request.status.to_string(),
                action: "open bidding",
            });
        }
        request.status = RequestStatus::Bidding;
        request.updated_at = ctx.now();
        self.store.save_request(&request).await?;
        self.bus.publish(DomainEvent::RequestStatusChanged {
            request_id,
            previous: RequestStatus::Pending,
            new: RequestStatus::Bidding,
        });
        self.notify_customer(&request);
        Ok(request)
    }

    /// `pending|bidding -> payment_completed` once `payment` has completed.
    /// The caller holds the request lock. Returns whether anything changed.
    pub(super) async fn settle_locked(
        &self,
        ctx: &OpContext,
        request: &mut Request,
        payment: &Payment,
    ) -> Result<bool, DispatchError> {
        if payment.request_id != request.id || payment.status != PaymentStatus::Completed {
            return Err(DispatchError::invalid(
                "settlement needs a completed payment for this request",
            ));
        }
        if !matches!(request.status, RequestStatus::Pending | RequestStatus::Bidding) {
            return Ok(false);
        }
        let previous = request.status;
        request.status = RequestStatus::PaymentCompleted;
        request.payment_status = RequestPaymentStatus::Completed;
        request.updated_at = ctx.now();
        self.store.save_request(request).await?;

        info!(request_id = %request.id, payment_id = %payment.id, "Payment settled");
        self.bus.publish(DomainEvent::RequestStatusChanged {
            request_id: request.id,
            previous,
            new: RequestStatus::PaymentCompleted,
        });
        self.notify(
            Some(request.user_id),
            NotificationChannel::Email,
            NotificationPayload::PaymentReceived {
                tracking_number: request.tracking_number.to_string(),
                amount: payment.amount,
                currency: payment.currency.clone(),
            },
        );
        Ok(true)
    }

    /// Settle a request against its latest payment and create its job.
    pub async fn settle_payment(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
    ) -> Result<Option<Job>, DispatchError> {
        let guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        let payment = self
            .store
            .latest_payment_for_request(request_id)
            .await?
            .filter(|p| p.status == PaymentStatus::Completed)
            .ok_or_else(|| DispatchError::invalid("request has no completed payment"))?;
        self.settle_locked(ctx, &mut request, &payment).await?;
        if request.status != RequestStatus::PaymentCompleted {
            return Ok(self.store.job_for_request(request_id).await?);
        }
        let creation = self.create_job_locked(ctx, &mut request).await?;
        drop(guard);
        Ok(Some(self.after_job_creation(ctx, creation).await))
    }

    /// `payment_completed -> accepted`, creating the request's job. Returns
    /// the existing job if there already is one.
    pub async fn create_job(&self, ctx: &OpContext, request_id: Uuid) -> Result<Job, DispatchError> {
        let guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        let creation = self.create_job_locked(ctx, &mut request).await?;
        drop(guard);
        Ok(self.after_job_creation(ctx, creation).await)
    }

    /// Caller holds the request lock.
    pub(super) async fn create_job_locked(
        &self,
        ctx: &OpContext,
        request: &mut Request,
    ) -> Result<JobCreation, DispatchError> {
        self.open_job_locked(ctx, request, &[RequestStatus::PaymentCompleted])
            .await
    }

    /// Create the request's job, moving the request from one of `from` to
    /// `accepted`. Caller holds the request lock.
    async fn open_job_locked(
        &self,
        ctx: &OpContext,
        request: &mut Request,
        from: &[RequestStatus],
    ) -> Result<JobCreation, DispatchError> {
        if let Some(existing) = self.store.job_for_request(request.id).await? {
            return Ok(JobCreation::Existing(existing));
        }
        if !from.contains(&request.status) {
            return Err(DispatchError::InvalidTransition {
                entity: "request",
                from: request.status.to_string(),
                action: "create a job",
            });
        }
        let base_price = request
            .base_price
            .ok_or_else(|| DispatchError::invalid("request has no base price"))?;
        let price = job_price(base_price, self.pricing.platform_fee_percentage()?);

        let now = ctx.now();
        let today = ctx.today();
        let prefix = ids::job_number_prefix(today);
        let mut sequence = self.store.count_jobs_with_prefix(&prefix).await? + 1;
        let mut job = Job {
            id: Uuid::now_v7(),
            job_number: ids::sequential_job_number(today, sequence),
            request_id: request.id,
            price,
            priority: request.priority,
            status: JobStatus::Pending,
            assigned_provider: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        let mut collisions = 0;
        let creation = loop {
            let event = TimelineEvent::new(
                job.id,
                TimelineEventType::Created,
                format!("Job {} created", job.job_number),
                json!({
                    "job_number": job.job_number.as_str(),
                    "request_id": request.id,
                    "price": price.to_string(),
                }),
                now,
                ctx.actor,
            );
            match self
                .store
                .create_job_for_request(&job, RequestStatus::Accepted, &event)
                .await
            {
                Ok(creation) => break creation,
                Err(StoreError::Conflict(_)) => {
                    collisions += 1;
                    if collisions > ids::JOB_NUMBER_MAX_SEQUENTIAL_ATTEMPTS + RANDOM_JOB_NUMBER_ATTEMPTS {
                        return Err(StoreError::Conflict("job_number".to_string()).into());
                    }
                    job.job_number = if collisions < ids::JOB_NUMBER_MAX_SEQUENTIAL_ATTEMPTS {
                        sequence += 1;
                        ids::sequential_job_number(today, sequence)
                    } else {
                        ids::random_job_number(today)
                    };
                    debug!(job_number = %job.job_number, collisions, "Job number taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let JobCreation::Created(job) = &creation {
            let previous = request.status;
            request.status = RequestStatus::Accepted;
            request.updated_at = now;
            info!(
                job_id = %job.id,
                job_number = %job.job_number,
                request_id = %request.id,
                price = %job.price,
                "Job created"
            );
            self.bus.publish(DomainEvent::JobCreated {
                job_id: job.id,
                request_id: request.id,
                job_number: job.job_number.clone(),
            });
            self.bus.publish(DomainEvent::RequestStatusChanged {
                request_id: request.id,
                previous,
                new: RequestStatus::Accepted,
            });
            self.notify_customer(request);
        }
        Ok(creation)
    }

    /// Dispatch a freshly created job. Runs without the request lock; a
    /// failed dispatch leaves the job open for direct assignment.
    pub(super) async fn after_job_creation(&self, ctx: &OpContext, creation: JobCreation) -> Job {
        match creation {
            JobCreation::Existing(job) => job,
            JobCreation::Created(job) => {
                if let Err(e) = self.dispatch_job(ctx, job.id).await {
                    warn!(job_id = %job.id, error = %e, "Initial dispatch failed");
                }
                job
            }
        }
    }

    /// Apply a guarded job transition with its timeline event. The caller
    /// holds the request lock.
    pub(super) async fn transition_job_locked(
        &self,
        ctx: &OpContext,
        job: &Job,
        to: JobStatus,
        request_status: Option<RequestStatus>,
        metadata: serde_json::Value,
        expire_pending_offers: bool,
    ) -> Result<(Job, Vec<Offer>), DispatchError> {
        let action = job_action(to);
        if !job.status.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition {
                entity: "job",
                from: job.status.to_string(),
                action,
            });
        }
        let now = ctx.now();
        let event = TimelineEvent::status_change(job.id, job.status, to, metadata, now, ctx.actor);
        let outcome = self
            .store
            .transition_job(JobTransition {
                job_id: job.id,
                from: job.status,
                to,
                at: now,
                event,
                request_status: request_status.map(|s| (job.request_id, s)),
                expire_pending_offers,
            })
            .await?;
        match outcome {
            TransitionOutcome::Applied {
                job: updated,
                expired_offers,
            } => {
                info!(job_id = %job.id, from = %job.status, to = %to, "Job transitioned");
                self.bus.publish(DomainEvent::JobStatusChanged {
                    job_id: job.id,
                    previous: job.status,
                    new: to,
                });
                Ok((updated, expired_offers))
            }
            TransitionOutcome::Stale(found) => Err(DispatchError::InvalidTransition {
                entity: "job",
                from: found.to_string(),
                action,
            }),
        }
    }

    /// Drive an assigned job's request-side transition (`start_transit`,
    /// `complete`).
    async fn advance_job(
        &self,
        ctx: &OpContext,
        job_id: Uuid,
        allowed: &[JobStatus],
        to: JobStatus,
        request_to: RequestStatus,
    ) -> Result<Job, DispatchError> {
        let request_id = self.load_job(job_id).await?.request_id;
        let _guard = self.request_locks.acquire(&request_id).await?;
        let job = self.load_job(job_id).await?;
        if !allowed.contains(&job.status) {
            return Err(DispatchError::InvalidTransition {
                entity: "job",
                from: job.status.to_string(),
                action: job_action(to),
            });
        }
        if let Actor::Provider(provider_id) = ctx.actor {
            if job.assigned_provider != Some(provider_id) {
                return Err(DispatchError::invalid("job is assigned to another provider"));
            }
        }
        let mut request = self.load_request(request_id).await?;
        let previous = request.status;
        let (job, _) = self
            .transition_job_locked(ctx, &job, to, Some(request_to), json!({}), false)
            .await?;
        request.status = request_to;
        self.bus.publish(DomainEvent::RequestStatusChanged {
            request_id,
            previous,
            new: request_to,
        });
        self.notify_customer(&request);
        Ok(job)
    }

    /// `assigned -> in_transit`.
    pub async fn start_transit(&self, ctx: &OpContext, job_id: Uuid) -> Result<Job, DispatchError> {
        self.advance_job(
            ctx,
            job_id,
            &[JobStatus::Assigned],
            JobStatus::InTransit,
            RequestStatus::InTransit,
        )
        .await
    }

    /// `assigned|in_transit -> completed`; folds the completion into the
    /// provider's metrics.
    pub async fn complete(&self, ctx: &OpContext, job_id: Uuid) -> Result<Job, DispatchError> {
        let job = self
            .advance_job(
                ctx,
                job_id,
                &[JobStatus::Assigned, JobStatus::InTransit],
                JobStatus::Completed,
                RequestStatus::Completed,
            )
            .await?;
        if let Some(provider_id) = job.assigned_provider {
            self.fold_metrics(provider_id, MetricsUpdate::Finished { completed: true })
                .await;
        }
        Ok(job)
    }

    /// Direct assignment of `provider_id` to the request's job. A pending or
    /// bidding request has no job yet; it is opened here without dispatch,
    /// and the payment settles against the assigned request later.
    pub async fn assign_provider(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Job, DispatchError> {
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        if !matches!(
            request.status,
            RequestStatus::Pending | RequestStatus::Bidding | RequestStatus::Accepted
        ) {
            return Err(DispatchError::InvalidTransition {
                entity: "request",
                from: request.status.to_string(),
                action: "assign a provider",
            });
        }
        let provider = self.load_provider(provider_id).await?;
        if !provider.verification_status.is_verified() {
            return Err(DispatchError::invalid("provider is not verified"));
        }
        let job = match self.store.job_for_request(request_id).await? {
            Some(job) => job,
            None => self
                .open_job_locked(
                    ctx,
                    &mut request,
                    &[RequestStatus::Pending, RequestStatus::Bidding],
                )
                .await?
                .job()
                .clone(),
        };
        if job.assigned_provider.is_some() {
            return Err(DispatchError::InvalidTransition {
                entity: "job",
                from: job.status.to_string(),
                action: "assign",
            });
        }
        self.assign_directly(ctx, job.id, &request, &provider).await
    }

    /// Cancel a request and its job. Cancelling a cancelled request returns
    /// it unchanged.
    pub async fn cancel_request(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<Request, DispatchError> {
        let reason = reason.into();
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        if request.status == RequestStatus::Cancelled {
            debug!(%request_id, "Request already cancelled");
            return Ok(request);
        }
        if request.status.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                entity: "request",
                from: request.status.to_string(),
                action: "cancel",
            });
        }
        let now = ctx.now();
        let previous = request.status;

        if let Some(job) = self.store.job_for_request(request_id).await? {
            if !job.status.is_terminal() {
                let _job_guard = self.job_locks.acquire(&job.id).await?;
                let job = self.load_job(job.id).await?;
                let assigned = job.assigned_provider;
                let metadata = json!({ "reason": reason, "cancelled_at": rfc3339(now) });
                let (job, expired) = self
                    .transition_job_locked(
                        ctx,
                        &job,
                        JobStatus::Cancelled,
                        Some(RequestStatus::Cancelled),
                        metadata,
                        true,
                    )
                    .await?;
                self.withdraw_offers(&job, &expired).await;
                if let Some(provider_id) = assigned {
                    match self.load_provider(provider_id).await {
                        Ok(provider) => self.notify(
                            Some(provider.user_id),
                            NotificationChannel::Push,
                            NotificationPayload::JobStatusChanged {
                                job_number: job.job_number.to_string(),
                                status: JobStatus::Cancelled.into(),
                                reason: Some(reason.clone()),
                            },
                        ),
                        Err(e) => warn!(%provider_id, error = %e, "Cannot notify provider of cancellation"),
                    }
                }
            }
        }

        request.status = RequestStatus::Cancelled;
        request.cancelled_at = Some(now);
        request.cancellation_reason = Some(reason);
        request.updated_at = now;
        self.store.save_request(&request).await?;

        info!(%request_id, previous = %previous, "Request cancelled");
        self.bus.publish(DomainEvent::RequestStatusChanged {
            request_id,
            previous,
            new: RequestStatus::Cancelled,
        });
        self.notify_customer(&request);
        Ok(request)
    }

    pub async fn timeline(&self, job_id: Uuid) -> Result<Vec<TimelineEvent>, DispatchError> {
        Ok(self.store.timeline_for_job(job_id).await?)
    }
}
