//! End-to-end dispatch flows against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use haulage_core::clock::{Actor, ManualClock, OpContext};
use haulage_core::config::EngineSettings;
use haulage_core::engine::{Engine, EngineParts, NewRequest, NewStop, PaymentUpdate, PollOutcome};
use haulage_core::entities::{
    FactorEntry, Job, JobStatus, OfferResponse, OracleStatus, PaymentStatus, PaymentType,
    PricingConfiguration, PricingFactor, Provider, ProviderMetrics, Request, RequestPaymentStatus,
    RequestPriority, RequestStatus, RequestType, ServiceLevel, StopType, TimelineEvent,
    TimelineEventType, VerificationStatus,
};
use haulage_core::error::{DispatchError, OracleError};
use haulage_core::events::{
    AutoAssignReceiver, DomainEvent, DomainEventReceiver, EventBus, NotificationReceiver,
    OutboundNotification, auto_assign_channel, domain_event_channel, notification_channel,
};
use haulage_core::geo::{GeoPoint, ServiceArea};
use haulage_core::ids;
use haulage_core::oracles::{
    GeoOracle, PaymentIntent, PaymentOracle, RefundReceipt, RouteEstimate, StaticWeather,
    VerifiedPayment, WeatherReport,
};
use haulage_core::pricing::{HolidayCalendar, PricingContext, PricingService};
use haulage_core::store::MemoryStore;
use haulage_sdk::objects::{JobStatus as SdkJobStatus, NotificationPayload};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use smallvec::SmallVec;
use time::OffsetDateTime;
use time::macros::{date, datetime};
use uuid::Uuid;

const PICKUP: GeoPoint = GeoPoint::new(5.56, -0.21);
const DROPOFF: GeoPoint = GeoPoint::new(5.54, -0.25);

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Payment processor whose answers are set by the test.
#[derive(Default)]
struct ScriptedPayments {
    statuses: Mutex<HashMap<String, OracleStatus>>,
    verifications: AtomicU32,
    refunds: AtomicU32,
}

impl ScriptedPayments {
    fn set(&self, intent_id: &str, status: OracleStatus) {
        self.statuses.lock().insert(intent_id.to_string(), status);
    }
}

#[async_trait]
impl PaymentOracle for ScriptedPayments {
    async fn initialize(
        &self,
        _amount: Decimal,
        _currency: &str,
        reference: &str,
        _metadata: serde_json::Value,
    ) -> Result<PaymentIntent, OracleError> {
        let intent_id = format!("pi_{reference}");
        self.set(&intent_id, OracleStatus::Pending);
        Ok(PaymentIntent {
            intent_id,
            authorization_url: Some(format!("https://pay.example/{reference}")),
        })
    }

    async fn verify(&self, intent_id: &str) -> Result<VerifiedPayment, OracleError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .lock()
            .get(intent_id)
            .copied()
            .ok_or_else(|| OracleError::Unexpected(format!("unknown intent {intent_id}")))?;
        Ok(VerifiedPayment {
            status,
            charge_id: status.is_terminal().then(|| format!("ch_{intent_id}")),
            metadata: json!({}),
        })
    }

    async fn refund(
        &self,
        _intent_id: &str,
        _amount: Option<Decimal>,
    ) -> Result<RefundReceipt, OracleError> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(RefundReceipt {
            refund_id: format!("rf_{n}"),
        })
    }
}

/// Every route is the same length.
struct FixedRoute {
    km: f64,
}

#[async_trait]
impl GeoOracle for FixedRoute {
    async fn geocode(&self, _address: &str) -> Result<GeoPoint, OracleError> {
        Err(OracleError::Unsupported)
    }

    async fn distance_and_duration(
        &self,
        _points: &[GeoPoint],
    ) -> Result<RouteEstimate, OracleError> {
        Ok(RouteEstimate {
            distance_m: self.km * 1000.0,
            duration_s: self.km / 30.0 * 3600.0,
            fuel_l: self.km * 0.1,
        })
    }
}

/// base 50, 3/km, 0.5/kg, weekend x1.2, holiday x1.5, clamped to [40, 500].
fn pricing_config() -> PricingConfiguration {
    PricingConfiguration {
        id: Uuid::nil(),
        name: "accra".into(),
        is_default: true,
        base_price: d("50"),
        min_price: d("40"),
        max_price_multiplier: d("10"),
        fuel_surcharge_percentage: Decimal::ZERO,
        carbon_offset_rate: Decimal::ZERO,
        platform_fee_percentage: d("15"),
        factors: vec![
            FactorEntry {
                name: "distance".into(),
                active: true,
                factor: PricingFactor::Distance {
                    base_rate_per_km: d("3"),
                    additional_distance_threshold: d("50"),
                    additional_distance_multiplier: d("0.8"),
                },
            },
            FactorEntry {
                name: "weight".into(),
                active: true,
                factor: PricingFactor::Weight {
                    base_rate_per_kg: d("0.5"),
                    heavy_item_threshold: d("100"),
                    heavy_item_surcharge: d("25"),
                },
            },
            FactorEntry {
                name: "time".into(),
                active: true,
                factor: PricingFactor::Time {
                    weekend_multiplier: d("1.2"),
                    holiday_multiplier: d("1.5"),
                },
            },
        ],
    }
}

struct Harness {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    payments: Arc<ScriptedPayments>,
    notifications: NotificationReceiver,
    auto_assign: AutoAssignReceiver,
    events: DomainEventReceiver,
}

impl Harness {
    /// Wednesday 2026-03-04, 10:00 UTC: a weekday outside peak hours.
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-04 10:00 UTC)));
        let payments = Arc::new(ScriptedPayments::default());
        let pricing = PricingService::new(Arc::new(StaticWeather(WeatherReport::normal())));
        pricing.publish(pricing_config()).unwrap();

        let (notification_tx, notifications) = notification_channel();
        let (auto_assign_tx, auto_assign) = auto_assign_channel();
        let (event_tx, events) = domain_event_channel();
        let engine = Engine::new(EngineParts {
            store: Arc::new(MemoryStore::new()),
            pricing,
            payments: payments.clone(),
            geo: Arc::new(FixedRoute { km: 5.0 }),
            bus: EventBus::new(notification_tx, auto_assign_tx, vec![event_tx]),
            settings: EngineSettings::default(),
        });
        Self {
            engine: Arc::new(engine),
            clock,
            payments,
            notifications,
            auto_assign,
            events,
        }
    }

    fn ctx(&self) -> OpContext {
        OpContext::system(self.clock.clone())
    }

    fn ctx_as(&self, actor: Actor) -> OpContext {
        OpContext::new(self.clock.clone(), actor)
    }

    fn now(&self) -> OffsetDateTime {
        self.ctx().now()
    }

    fn drain_notifications(&mut self) -> Vec<OutboundNotification> {
        std::iter::from_fn(|| self.notifications.try_recv().ok()).collect()
    }

    fn drain_events(&mut self) -> Vec<DomainEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    async fn add_provider(&self, name: &str, location: GeoPoint) -> Provider {
        let now = self.now();
        let provider = Provider {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: name.to_string(),
            service_area: ServiceArea::Radius {
                center: PICKUP,
                radius_km: 25.0,
            },
            categories: SmallVec::new(),
            capacity_kg: d("1000"),
            capacity_m3: d("20"),
            min_job_value: Decimal::ZERO,
            availability: Vec::new(),
            verification_status: VerificationStatus::Verified,
            metrics: ProviderMetrics::default(),
            is_available: true,
            current_location: Some(location),
            last_location_update: Some(now),
            auto_accept: false,
            registered_at: now,
        };
        self.engine.store().upsert_provider(&provider).await.unwrap();
        provider
    }

    /// A submitted instant request from pickup to dropoff.
    async fn submitted(&self, priority: RequestPriority) -> Request {
        self.submitted_as(RequestType::Instant, priority).await
    }

    async fn submitted_as(&self, request_type: RequestType, priority: RequestPriority) -> Request {
        let customer = Uuid::now_v7();
        let ctx = self.ctx_as(Actor::Customer(customer));
        let mut new = NewRequest::new(customer, request_type, date!(2026 - 03 - 04));
        new.priority = priority;
        new.estimated_weight_kg = Some(d("40"));
        let draft = self.engine.create_draft(&ctx, new).await.unwrap();
        self.engine
            .add_stop(&ctx, draft.id, NewStop::new(StopType::Pickup, PICKUP, "Osu, Accra"))
            .await
            .unwrap();
        self.engine
            .add_stop(&ctx, draft.id, NewStop::new(StopType::Dropoff, DROPOFF, "Dansoman, Accra"))
            .await
            .unwrap();
        let (request, _) = self.engine.submit(&ctx, draft.id).await.unwrap();
        request
    }

    /// Pay for `request` in full and return what settlement did.
    async fn pay(&self, request: &Request) -> PaymentUpdate {
        let ctx = self.ctx();
        let payment = self
            .engine
            .initialize_payment(&ctx, request.id, PaymentType::Full, None)
            .await
            .unwrap();
        let intent_id = payment.intent_id.clone().unwrap();
        self.payments.set(&intent_id, OracleStatus::Succeeded);
        let verified = VerifiedPayment {
            status: OracleStatus::Succeeded,
            charge_id: Some(format!("ch_{intent_id}")),
            metadata: json!({}),
        };
        self.engine
            .apply_payment_status(&ctx, payment.id, verified)
            .await
            .unwrap()
    }

    async fn paid_job(&self, priority: RequestPriority) -> (Request, Job) {
        let request = self.submitted(priority).await;
        let job = self.pay(&request).await.job_created.unwrap();
        let request = self.engine.store().get_request(request.id).await.unwrap().unwrap();
        (request, job)
    }

    async fn job(&self, id: Uuid) -> Job {
        self.engine.store().get_job(id).await.unwrap().unwrap()
    }
}

/// Status-change events must chain from `pending` along allowed edges.
fn assert_timeline_path(events: &[TimelineEvent]) {
    assert_eq!(events.first().map(|e| e.event_type), Some(TimelineEventType::Created));
    let mut current = JobStatus::Pending;
    for (from, to) in events.iter().filter_map(TimelineEvent::transition) {
        assert_eq!(from, current, "timeline jumps from {current} to {from}");
        assert!(from.can_transition_to(to), "{from} -> {to} is not allowed");
        current = to;
    }
}

#[tokio::test]
async fn test_happy_path_instant_job() {
    let mut h = Harness::new();
    let request = h.submitted(RequestPriority::Standard).await;

    // 50 + 5 km x 3 + 40 kg x 0.5
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.base_price, Some(d("85")));
    assert_eq!(request.estimated_distance_km, Some(d("5")));
    assert_eq!(request.pricing_version, Some(h.engine.pricing().snapshot().version));

    let update = h.pay(&request).await;
    assert_eq!(update.payment.status, PaymentStatus::Completed);
    assert_eq!(update.payment.amount, d("85"));
    assert!(update.request_settled);
    let job = update.job_created.unwrap();
    assert!(ids::is_job_number(&job.job_number), "{}", job.job_number);
    assert_eq!(job.job_number, "JOB-202603-001");
    assert_eq!(job.status, JobStatus::Pending);
    // provider pay is the price less the 15% platform fee
    assert_eq!(job.price, d("72.25"));
    assert!(job.created_at >= update.payment.completed_at.unwrap());

    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Accepted);
    assert_eq!(stored.payment_status, RequestPaymentStatus::Completed);

    let statuses: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            DomainEvent::RequestStatusChanged { request_id, new, .. } if request_id == request.id => {
                Some(new)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::Pending,
            RequestStatus::PaymentCompleted,
            RequestStatus::Accepted
        ]
    );

    // settling again is a no-op that hands back the same job
    let again = h.engine.settle_payment(&h.ctx(), request.id).await.unwrap();
    assert_eq!(again.map(|j| j.id), Some(job.id));
}

#[tokio::test]
async fn test_second_job_in_month_takes_next_number() {
    let h = Harness::new();
    let (_, first) = h.paid_job(RequestPriority::Standard).await;
    let (_, second) = h.paid_job(RequestPriority::Standard).await;
    assert_eq!(first.job_number, "JOB-202603-001");
    assert_eq!(second.job_number, "JOB-202603-002");
}

#[tokio::test]
async fn test_offer_race_has_one_winner() {
    let mut h = Harness::new();
    let p1 = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    let p2 = h.add_provider("Ama Haulage", GeoPoint::new(5.565, -0.205)).await;
    let p3 = h.add_provider("Kofi Trucks", GeoPoint::new(5.57, -0.22)).await;
    let (_, job) = h.paid_job(RequestPriority::Standard).await;

    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    assert_eq!(offers.len(), 3);
    let offer_of = |provider: &Provider| {
        offers
            .iter()
            .find(|o| o.provider_id == provider.id)
            .cloned()
            .unwrap()
    };
    let (o1, o2, o3) = (offer_of(&p1), offer_of(&p2), offer_of(&p3));
    h.drain_notifications();

    let (as_p2, as_p3) = (h.ctx_as(Actor::Provider(p2.id)), h.ctx_as(Actor::Provider(p3.id)));
    let (r2, r3) = tokio::join!(
        h.engine.respond_to_offer(&as_p2, o2.id, p2.id, true),
        h.engine.respond_to_offer(&as_p3, o3.id, p3.id, true),
    );
    let (winner, loser, lost) = match (r2, r3) {
        (Ok(_), Err(e)) => (&p2, &p3, e),
        (Err(e), Ok(_)) => (&p3, &p2, e),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(matches!(lost, DispatchError::StaleAssignment { job_id } if job_id == job.id));

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Assigned);
    assert_eq!(job.assigned_provider, Some(winner.id));

    let notifications = h.drain_notifications();
    assert!(notifications.iter().any(|n| n.recipient == Some(loser.user_id)
        && matches!(n.payload, NotificationPayload::JobNoLongerAvailable { .. })));

    // P1 never answered; its offer is gone by the deadline
    h.clock.advance(time::Duration::minutes(6));
    h.engine.sweep_expired_offers(&h.ctx()).await.unwrap();
    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    let p1_offer = offers.iter().find(|o| o.id == o1.id).unwrap();
    assert_eq!(p1_offer.response, OfferResponse::Expired);
    assert_eq!(
        offers.iter().filter(|o| o.response == OfferResponse::Accepted).count(),
        1
    );
    assert!(offers.iter().all(|o| matches!(
        o.response,
        OfferResponse::Accepted | OfferResponse::Declined | OfferResponse::Expired
    )));

    assert_timeline_path(&h.engine.timeline(job.id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_are_single_writer() {
    let h = Harness::new();
    let mut providers = Vec::new();
    for (i, lng) in [-0.211, -0.212, -0.213, -0.214, -0.215].into_iter().enumerate() {
        providers.push(h.add_provider(&format!("Carrier {i}"), GeoPoint::new(5.561, lng)).await);
    }
    let (_, job) = h.paid_job(RequestPriority::Standard).await;
    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    assert_eq!(offers.len(), providers.len());

    let tasks: Vec<_> = offers
        .into_iter()
        .map(|offer| {
            let engine = h.engine.clone();
            let ctx = h.ctx_as(Actor::Provider(offer.provider_id));
            tokio::spawn(async move {
                engine
                    .respond_to_offer(&ctx, offer.id, offer.provider_id, true)
                    .await
            })
        })
        .collect();
    let results: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::StaleAssignment { .. })))
        .count();
    assert_eq!(stale, providers.len() - 1);
    assert_eq!(h.job(job.id).await.assigned_provider, Some(winners[0].provider_id));
}

#[tokio::test]
async fn test_unanswered_offers_expire_then_job_escalates() {
    let mut h = Harness::new();
    h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    h.add_provider("Ama Haulage", GeoPoint::new(5.565, -0.205)).await;
    let (_, job) = h.paid_job(RequestPriority::Standard).await;
    h.drain_events();

    h.clock.advance(time::Duration::minutes(5));
    let summary = h.engine.sweep_expired_offers(&h.ctx()).await.unwrap();
    assert_eq!(summary.expired, 0, "offers are open up to their deadline");

    h.clock.advance(time::Duration::seconds(1));
    let summary = h.engine.sweep_expired_offers(&h.ctx()).await.unwrap();
    assert_eq!(summary.expired, 2);
    // everyone nearby has been asked already
    assert_eq!(summary.escalated, 1);
    assert_eq!(summary.redispatched, 0);

    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    assert!(offers.iter().all(|o| o.response == OfferResponse::Expired));
    assert_eq!(h.job(job.id).await.status, JobStatus::Pending);
    assert!(h.drain_events().iter().any(
        |e| matches!(e, DomainEvent::AdminAlert { job_id: Some(id), .. } if *id == job.id)
    ));
}

#[tokio::test]
async fn test_urgent_job_without_candidates_escalates() {
    let mut h = Harness::new();
    // verified but too far away to be offered anything
    h.add_provider("Kumasi Freight", GeoPoint::new(6.69, -1.62)).await;
    let (request, job) = h.paid_job(RequestPriority::Urgent).await;
    assert_eq!(request.base_price, Some(d("170")), "urgent doubles the price");

    assert_eq!(h.job(job.id).await.status, JobStatus::Pending);
    assert!(h.engine.store().offers_for_job(job.id).await.unwrap().is_empty());

    let alerts: Vec<_> = h
        .drain_notifications()
        .into_iter()
        .filter(|n| matches!(n.payload, NotificationPayload::AdminAlert { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].recipient, None);

    let queued = h.auto_assign.try_recv().unwrap();
    assert_eq!(queued.job_id, job.id);
    assert_eq!(queued.delay, h.engine.settings().dispatch.auto_assign_delay);

    let timeline = h.engine.timeline(job.id).await.unwrap();
    let escalated = timeline
        .iter()
        .find(|e| e.event_type == TimelineEventType::Escalated)
        .unwrap();
    assert_eq!(escalated.metadata["urgent"], true);

    // another round finds nobody either
    let outcome = h.engine.dispatch_job(&h.ctx(), job.id).await.unwrap();
    assert!(outcome.offers.is_empty());
    assert!(outcome.escalated);

    // the scheduled fallback has nobody to assign
    assert!(h.engine.auto_assign(&h.ctx(), job.id).await.unwrap().is_none());
    assert_eq!(h.job(job.id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_urgent_auto_assign_takes_best_open_offer() {
    let h = Harness::new();
    let near = h.add_provider("Next Door", GeoPoint::new(5.5601, -0.2101)).await;
    h.add_provider("Across Town", GeoPoint::new(5.60, -0.18)).await;
    let (_, job) = h.paid_job(RequestPriority::Urgent).await;

    let assigned = h.engine.auto_assign(&h.ctx(), job.id).await.unwrap().unwrap();
    assert_eq!(assigned.status, JobStatus::Assigned);
    assert_eq!(assigned.assigned_provider, Some(near.id));

    // a second attempt finds the job taken
    assert!(h.engine.auto_assign(&h.ctx(), job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stuck_payment_is_repaired_by_reconciler() {
    let h = Harness::new();
    let request = h.submitted(RequestPriority::Standard).await;
    let ctx = h.ctx();
    let payment = h
        .engine
        .initialize_payment(&ctx, request.id, PaymentType::Full, None)
        .await
        .unwrap();
    let intent_id = payment.intent_id.clone().unwrap();
    h.payments.set(&intent_id, OracleStatus::Processing);
    let processing = VerifiedPayment {
        status: OracleStatus::Processing,
        charge_id: None,
        metadata: json!({}),
    };
    let update = h
        .engine
        .apply_payment_status(&ctx, payment.id, processing)
        .await
        .unwrap();
    assert_eq!(update.payment.status, PaymentStatus::Processing);
    assert!(update.job_created.is_none());

    // not stuck yet: nothing to poll or repair
    h.clock.advance(time::Duration::minutes(30));
    let summary = h.engine.reconcile(&h.ctx()).await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.payments_polled, 0);
    assert!(summary.is_clean());
    assert_eq!(h.payments.verifications.load(Ordering::SeqCst), 0);

    h.clock.advance(time::Duration::minutes(35));
    h.payments.set(&intent_id, OracleStatus::Succeeded);
    let summary = h.engine.reconcile(&h.ctx()).await.unwrap();
    assert_eq!(summary.payments_polled, 1);
    assert_eq!(summary.status_updated, 1);
    assert_eq!(summary.jobs_created, 1);
    assert_eq!(summary.errors, 0);

    let payment = h.engine.store().get_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.last_polled_at.is_some());
    let job = h.engine.store().job_for_request(request.id).await.unwrap().unwrap();
    assert!(job.created_at >= payment.completed_at.unwrap());
    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Accepted);
    assert_eq!(stored.payment_status, RequestPaymentStatus::Completed);

    let second = h.engine.reconcile(&h.ctx()).await.unwrap();
    assert!(second.is_clean(), "{second:?}");
    assert_eq!(second.payments_polled, 0);
}

#[tokio::test]
async fn test_direct_poll_of_a_fresh_payment_verifies_once() {
    let h = Harness::new();
    let request = h.submitted(RequestPriority::Standard).await;
    let ctx = h.ctx();
    let payment = h
        .engine
        .initialize_payment(&ctx, request.id, PaymentType::Full, None)
        .await
        .unwrap();
    h.payments
        .set(payment.intent_id.as_deref().unwrap(), OracleStatus::Failed);

    let PollOutcome::Checked(update) = h.engine.poll_payment(&ctx, payment.id).await.unwrap() else {
        panic!("a fresh payment is verified, not backoff-polled");
    };
    assert_eq!(update.payment.status, PaymentStatus::Failed);
    assert!(update.job_created.is_none());
    assert_eq!(h.payments.verifications.load(Ordering::SeqCst), 1);

    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(stored.payment_status, RequestPaymentStatus::Failed);
}

#[tokio::test]
async fn test_forecast_across_holiday_weekend() {
    let h = Harness::new();
    h.engine
        .pricing()
        .set_holidays(HolidayCalendar::new([date!(2026 - 03 - 08)]));

    let base = PricingContext {
        distance_km: d("5"),
        weight_kg: d("40"),
        volume_m3: Decimal::ZERO,
        item_count: 0,
        fragile_items: 0,
        disassembly_items: 0,
        staff_count: 0,
        property: None,
        insurance: None,
        pickup: Some(PICKUP),
        dropoff: Some(DROPOFF),
        date: date!(2026 - 03 - 07),
        service_level: ServiceLevel::Standard,
        priority: RequestPriority::Standard,
    };
    let days = h
        .engine
        .pricing()
        .forecast(&h.ctx(), &base, date!(2026 - 03 - 07), date!(2026 - 03 - 09))
        .unwrap();
    assert_eq!(days.len(), 3);

    let (sat, sun, mon) = (&days[0], &days[1], &days[2]);
    assert!(sat.is_weekend && !sat.is_holiday);
    assert_eq!(sat.time_multiplier, d("1.2"));
    assert_eq!(sat.base_price, d("102"));
    assert!(sun.is_weekend && sun.is_holiday);
    assert_eq!(sun.time_multiplier, d("1.5"), "holiday outranks weekend");
    assert_eq!(sun.base_price, d("127.5"));
    assert!(!mon.is_weekend && !mon.is_holiday);
    assert_eq!(mon.time_multiplier, Decimal::ONE);
    assert_eq!(mon.base_price, d("85"));

    for day in &days {
        assert_eq!(day.options.len(), 4);
        let per_staff = |total: Decimal, staff: u8| total / Decimal::from(staff);
        let best = per_staff(day.best_price, day.best_staff_count);
        assert!(
            day.options
                .iter()
                .all(|o| best <= per_staff(o.total_price, o.staff_count)),
            "{}: best staff count does not minimise price per staff",
            day.date
        );
    }
}

#[tokio::test]
async fn test_cancel_after_acceptance() {
    let mut h = Harness::new();
    let provider = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    let (request, job) = h.paid_job(RequestPriority::Standard).await;
    let offer = h.engine.store().offers_for_job(job.id).await.unwrap().remove(0);
    h.engine
        .respond_to_offer(&h.ctx_as(Actor::Provider(provider.id)), offer.id, provider.id, true)
        .await
        .unwrap();
    assert_eq!(h.job(job.id).await.status, JobStatus::Assigned);
    h.drain_notifications();

    h.clock.advance(time::Duration::minutes(20));
    let customer = h.ctx_as(Actor::Customer(request.user_id));
    let cancelled = h
        .engine
        .cancel_request(&customer, request.id, "customer changed plans")
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("customer changed plans"));

    let job = h.job(job.id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    let timeline = h.engine.timeline(job.id).await.unwrap();
    let event = timeline
        .iter()
        .rev()
        .find(|e| e.transition() == Some((JobStatus::Assigned, JobStatus::Cancelled)))
        .unwrap();
    assert_eq!(event.metadata["previous_status"], "assigned");
    assert_eq!(event.metadata["reason"], "customer changed plans");
    assert!(event.metadata["cancelled_at"].is_string());
    assert_eq!(event.created_by, Actor::Customer(request.user_id));
    assert_timeline_path(&timeline);

    let notifications = h.drain_notifications();
    assert!(notifications.iter().any(|n| n.recipient == Some(provider.user_id)
        && n.payload
            == NotificationPayload::JobStatusChanged {
                job_number: job.job_number.to_string(),
                status: SdkJobStatus::Cancelled,
                reason: Some("customer changed plans".to_string()),
            }));

    // refunds are left to payment policy
    assert_eq!(h.payments.refunds.load(Ordering::SeqCst), 0);
    let payment = h
        .engine
        .store()
        .latest_payment_for_request(request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    // cancelling again changes nothing
    h.clock.advance(time::Duration::minutes(1));
    let again = h
        .engine
        .cancel_request(&customer, request.id, "second thoughts")
        .await
        .unwrap();
    assert_eq!(again.status, RequestStatus::Cancelled);
    assert_eq!(again.cancelled_at, cancelled.cancelled_at);
    assert_eq!(again.cancellation_reason, cancelled.cancellation_reason);
    assert_eq!(again.updated_at, cancelled.updated_at);
    assert_eq!(h.engine.timeline(job.id).await.unwrap().len(), timeline.len());
}

#[tokio::test]
async fn test_full_job_lifecycle_updates_provider_metrics() {
    let h = Harness::new();
    let provider = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    let (request, job) = h.paid_job(RequestPriority::Standard).await;
    let offer = h.engine.store().offers_for_job(job.id).await.unwrap().remove(0);
    let as_provider = h.ctx_as(Actor::Provider(provider.id));

    h.clock.advance(time::Duration::minutes(2));
    h.engine
        .respond_to_offer(&as_provider, offer.id, provider.id, true)
        .await
        .unwrap();
    h.engine.start_transit(&as_provider, job.id).await.unwrap();
    let done = h.engine.complete(&as_provider, job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
    // a finished request can no longer be cancelled
    assert!(matches!(
        h.engine.cancel_request(&h.ctx(), request.id, "too late").await,
        Err(DispatchError::InvalidTransition { .. })
    ));

    let metrics = h
        .engine
        .store()
        .get_provider(provider.id)
        .await
        .unwrap()
        .unwrap()
        .metrics;
    assert_eq!(metrics.completed_jobs, 1);
    assert_eq!(metrics.completion_rate, 100.0);
    assert_eq!(metrics.avg_response_minutes, Some(2.0));

    let timeline = h.engine.timeline(job.id).await.unwrap();
    assert_timeline_path(&timeline);
    let path: Vec<_> = timeline.iter().filter_map(TimelineEvent::transition).collect();
    assert_eq!(
        path,
        vec![
            (JobStatus::Pending, JobStatus::Assigned),
            (JobStatus::Assigned, JobStatus::InTransit),
            (JobStatus::InTransit, JobStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn test_pricing_is_deterministic() {
    let h = Harness::new();
    let request = h.submitted(RequestPriority::High).await;
    let ctx = h.ctx();
    let first = h
        .engine
        .pricing()
        .quote_request(&ctx, &request, d("5"))
        .await
        .unwrap();
    let second = h
        .engine
        .pricing()
        .quote_request(&ctx, &request, d("5"))
        .await
        .unwrap();
    assert_eq!(first, second);
    // the stored price is what the active configuration produces
    assert_eq!(request.base_price, Some(first.final_price));
}

#[tokio::test]
async fn test_bidding_request_assigned_before_payment() {
    let h = Harness::new();
    let provider = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    let request = h
        .submitted_as(RequestType::Biddable, RequestPriority::Standard)
        .await;
    let customer = h.ctx_as(Actor::Customer(request.user_id));
    let bidding = h.engine.open_bidding(&customer, request.id).await.unwrap();
    assert_eq!(bidding.status, RequestStatus::Bidding);

    let admin = h.ctx_as(Actor::Admin(Uuid::now_v7()));
    let job = h
        .engine
        .assign_provider(&admin, request.id, provider.id)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
    assert_eq!(job.assigned_provider, Some(provider.id));
    assert_eq!(job.price, d("72.25"));

    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Assigned);
    assert_eq!(stored.payment_status, RequestPaymentStatus::Pending);

    // the job was opened for this assignment only, nobody else was asked
    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].provider_id, provider.id);
    assert_eq!(offers[0].response, OfferResponse::Accepted);
    assert_timeline_path(&h.engine.timeline(job.id).await.unwrap());

    let other = h.add_provider("Ama Haulage", GeoPoint::new(5.565, -0.205)).await;
    assert!(matches!(
        h.engine.assign_provider(&admin, request.id, other.id).await,
        Err(DispatchError::InvalidTransition { .. })
    ));

    // paying afterwards settles the payment status and leaves the assignment alone
    let update = h.pay(&stored).await;
    assert_eq!(update.payment.status, PaymentStatus::Completed);
    assert!(!update.request_settled);
    assert!(update.payment_status_fixed);
    assert!(update.job_created.is_none());
    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Assigned);
    assert_eq!(stored.payment_status, RequestPaymentStatus::Completed);
    assert_eq!(h.job(job.id).await.assigned_provider, Some(provider.id));
}

#[tokio::test]
async fn test_overloaded_provider_keeps_best_offers() {
    let h = Harness::new();
    let mut provider = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    // earns the urgent boost
    provider.metrics.avg_rating = 4.8;
    provider.metrics.rating_count = 20;
    provider.metrics.completion_rate = 100.0;
    h.engine.store().upsert_provider(&provider).await.unwrap();

    let mut jobs = Vec::new();
    for priority in [
        RequestPriority::Standard,
        RequestPriority::Standard,
        RequestPriority::Standard,
        RequestPriority::Urgent,
        RequestPriority::Urgent,
    ] {
        let (_, job) = h.paid_job(priority).await;
        jobs.push(job);
        h.clock.advance(time::Duration::seconds(1));
    }
    let pending_before = h
        .engine
        .store()
        .pending_offers_for_provider(provider.id)
        .await
        .unwrap();
    assert_eq!(pending_before.len(), 5);

    let summary = h.engine.sweep_expired_offers(&h.ctx()).await.unwrap();
    assert_eq!(summary.expired, 0);
    assert_eq!(summary.rebalanced, 3);
    // the only provider nearby already had each shed job
    assert_eq!(summary.escalated, 3);
    assert_eq!(summary.redispatched, 0);

    let kept: Vec<Uuid> = h
        .engine
        .store()
        .pending_offers_for_provider(provider.id)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.job_id)
        .collect();
    assert_eq!(kept.len(), h.engine.settings().dispatch.rebalance_keep);
    // the newer urgent offers outscore the older standard ones
    assert!(kept.contains(&jobs[3].id));
    assert!(kept.contains(&jobs[4].id));
    for job in &jobs[..3] {
        let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].response, OfferResponse::Expired);
        assert_eq!(h.job(job.id).await.status, JobStatus::Pending);
    }
}

#[tokio::test]
async fn test_decline_of_last_open_offer_asks_next_provider() {
    let mut h = Harness::new();
    let first = h.add_provider("Kwame Movers", GeoPoint::new(5.561, -0.211)).await;
    let (_, job) = h.paid_job(RequestPriority::Standard).await;
    let offer = h.engine.store().offers_for_job(job.id).await.unwrap().remove(0);
    assert_eq!(offer.provider_id, first.id);

    // comes online after the first round
    let second = h.add_provider("Ama Haulage", GeoPoint::new(5.565, -0.205)).await;
    h.drain_notifications();

    let as_first = h.ctx_as(Actor::Provider(first.id));
    let declined = h
        .engine
        .respond_to_offer(&as_first, offer.id, first.id, false)
        .await
        .unwrap();
    assert_eq!(declined.response, OfferResponse::Declined);

    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    assert_eq!(offers.len(), 2);
    let next = offers.iter().find(|o| o.provider_id == second.id).unwrap();
    assert_eq!(next.response, OfferResponse::Pending);
    assert!(next.rank > offer.rank);
    assert!(h.drain_notifications().iter().any(|n| n.recipient == Some(second.user_id)));
    assert_eq!(h.job(job.id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_removing_a_stop_renumbers_the_rest() {
    let h = Harness::new();
    let customer = Uuid::now_v7();
    let ctx = h.ctx_as(Actor::Customer(customer));
    let draft = h
        .engine
        .create_draft(
            &ctx,
            NewRequest::new(customer, RequestType::Journey, date!(2026 - 03 - 04)),
        )
        .await
        .unwrap();
    let stops = [
        (StopType::Pickup, PICKUP, "Osu"),
        (StopType::Intermediate, GeoPoint::new(5.555, -0.22), "Adabraka"),
        (StopType::Intermediate, GeoPoint::new(5.55, -0.23), "Korle Bu"),
        (StopType::Dropoff, DROPOFF, "Dansoman"),
    ];
    let mut request = draft;
    for (stop_type, location, address) in stops {
        request = h
            .engine
            .add_stop(&ctx, request.id, NewStop::new(stop_type, location, address))
            .await
            .unwrap();
    }
    let adabraka = request.stops.iter().find(|s| s.address == "Adabraka").unwrap().id;

    let request = h.engine.remove_stop(&ctx, request.id, adabraka).await.unwrap();
    let sequences: Vec<u32> = request.stops.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let addresses: Vec<&str> = request.stops.iter().map(|s| s.address.as_str()).collect();
    assert_eq!(addresses, vec!["Osu", "Korle Bu", "Dansoman"]);

    let stored = h.engine.store().get_request(request.id).await.unwrap().unwrap();
    assert_eq!(
        stored.stops.iter().map(|s| s.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn test_auto_assign_passes_over_lapsed_offer() {
    let h = Harness::new();
    let lapsed = h.add_provider("Next Door", GeoPoint::new(5.5601, -0.2101)).await;
    let (_, job) = h.paid_job(RequestPriority::Urgent).await;

    // the offer is past its deadline but the sweep has not run yet
    h.clock.advance(time::Duration::minutes(6));
    let fallback = h.add_provider("Across Town", GeoPoint::new(5.60, -0.18)).await;

    let assigned = h.engine.auto_assign(&h.ctx(), job.id).await.unwrap().unwrap();
    assert_eq!(assigned.assigned_provider, Some(fallback.id));

    let offers = h.engine.store().offers_for_job(job.id).await.unwrap();
    let old = offers.iter().find(|o| o.provider_id == lapsed.id).unwrap();
    assert_eq!(old.response, OfferResponse::Expired);
    assert_timeline_path(&h.engine.timeline(job.id).await.unwrap());
}
