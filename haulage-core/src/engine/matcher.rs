//! Provider filtering and ranking.

use std::cmp::Ordering;
use std::collections::HashSet;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::Engine;
use crate::clock::OpContext;
use crate::entities::{Provider, Request};
use crate::error::DispatchError;
use crate::geo::GeoPoint;

/// Why a provider was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotVerified,
    Unavailable,
    NoFreshLocation,
    TooFar,
    OutsideServiceArea,
    OverCapacity,
    BelowMinimumValue,
    NotScheduled,
    CategoryMismatch,
    Busy,
}

/// Every filter except the active-job count, which needs the store.
/// Returns the distance to the pickup on success.
pub fn check_eligibility(
    provider: &Provider,
    request: &Request,
    pickup: GeoPoint,
    now: OffsetDateTime,
    max_distance_km: f64,
) -> Result<f64, Rejection> {
    if !provider.verification_status.is_verified() {
        return Err(Rejection::NotVerified);
    }
    if !provider.is_available {
        return Err(Rejection::Unavailable);
    }
    let location = match provider.current_location {
        Some(location) if provider.has_fresh_location(now) => location,
        _ => return Err(Rejection::NoFreshLocation),
    };
    let distance_km = location.distance_km(&pickup);
    if distance_km > max_distance_km {
        return Err(Rejection::TooFar);
    }
    if !provider.service_area.covers(&pickup) {
        return Err(Rejection::OutsideServiceArea);
    }
    if let Some(weight) = request.estimated_weight_kg {
        if provider.capacity_kg < weight {
            return Err(Rejection::OverCapacity);
        }
    }
    let volume = request.total_volume_m3();
    if volume > Decimal::ZERO && provider.capacity_m3 > Decimal::ZERO && provider.capacity_m3 < volume
    {
        return Err(Rejection::OverCapacity);
    }
    if let Some(budget) = request.estimated_price {
        if provider.min_job_value > budget {
            return Err(Rejection::BelowMinimumValue);
        }
    }
    if !provider.works_on(request.pickup_date.weekday().into()) {
        return Err(Rejection::NotScheduled);
    }
    if let Some(category) = &request.required_category {
        if !provider.accepts_category(category) {
            return Err(Rejection::CategoryMismatch);
        }
    }
    Ok(distance_km)
}

/// Score components, kept for logging and offer audit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub rating: f64,
    pub completion: f64,
    pub response: f64,
    pub experience: f64,
    pub urgent_boost: f64,
    pub auto_accept: f64,
    pub specialist: f64,
}

/// Response score for providers that have never answered an offer.
const NEW_PROVIDER_RESPONSE_SCORE: f64 = 10.0;

impl ScoreBreakdown {
    pub fn compute(provider: &Provider, distance_km: f64, urgent: bool) -> Self {
        let m = &provider.metrics;
        let mut urgent_boost = 0.0;
        if urgent {
            if m.avg_rating >= 4.5 {
                urgent_boost += 10.0;
            }
            if m.completion_rate >= 95.0 {
                urgent_boost += 5.0;
            }
        }
        Self {
            distance: (30.0 - distance_km * 3.0).max(0.0),
            rating: (m.avg_rating * 5.0).min(25.0),
            completion: m.completion_rate / 100.0 * 20.0,
            response: m
                .avg_response_minutes
                .map_or(NEW_PROVIDER_RESPONSE_SCORE, |minutes| {
                    (15.0 - minutes / 2.0).max(0.0)
                }),
            experience: (f64::from(m.total_jobs) / 10.0).min(10.0),
            urgent_boost,
            auto_accept: if provider.auto_accept { 5.0 } else { 0.0 },
            specialist: if provider.categories.len() == 1 { 5.0 } else { 0.0 },
        }
    }

    pub fn total(&self) -> f64 {
        self.distance
            + self.rating
            + self.completion
            + self.response
            + self.experience
            + self.urgent_boost
            + self.auto_accept
            + self.specialist
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Provider,
    pub distance_km: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Best first: score descending, then distance, then earliest registration.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.provider.registered_at.cmp(&b.provider.registered_at))
    });
}

impl Engine {
    /// Ranked, eligible providers for `request`, skipping `exclude`.
    pub(super) async fn find_candidates(
        &self,
        ctx: &OpContext,
        request: &Request,
        exclude: &HashSet<Uuid>,
    ) -> Result<Vec<Candidate>, DispatchError> {
        let Some(pickup) = request.pickup().map(|s| s.location) else {
            return Err(DispatchError::invalid("request has no pickup stop"));
        };
        let settings = &self.settings.dispatch;
        let now = ctx.now();
        let nearby = self
            .store
            .providers_within_radius(pickup, settings.max_offer_distance_km)
            .await?;

        let mut candidates = Vec::new();
        for provider in nearby {
            ctx.cancel.check()?;
            if exclude.contains(&provider.id) {
                continue;
            }
            let distance_km = match check_eligibility(
                &provider,
                request,
                pickup,
                now,
                settings.max_offer_distance_km,
            ) {
                Ok(d) => d,
                Err(reason) => {
                    debug!(provider_id = %provider.id, ?reason, "Provider rejected");
                    continue;
                }
            };
            if self.store.active_job_count(provider.id).await? >= settings.max_active_jobs {
                debug!(provider_id = %provider.id, reason = ?Rejection::Busy, "Provider rejected");
                continue;
            }
            let breakdown = ScoreBreakdown::compute(&provider, distance_km, request.is_urgent());
            candidates.push(Candidate {
                score: breakdown.total(),
                provider,
                distance_km,
                breakdown,
            });
        }
        rank_candidates(&mut candidates);
        candidates.truncate(settings.max_candidates);
        debug!(request_id = %request.id, count = candidates.len(), "Candidates ranked");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        ProviderMetrics, RequestPaymentStatus, RequestPriority, RequestStatus, RequestType,
        ServiceLevel, VerificationStatus,
    };
    use crate::geo::ServiceArea;
    use compact_str::CompactString;
    use smallvec::smallvec;
    use time::macros::{date, datetime};

    const NOW: OffsetDateTime = datetime!(2026-03-04 10:00 UTC);
    const PICKUP: GeoPoint = GeoPoint::new(5.6037, -0.1870);

    fn provider(offset_lat: f64) -> Provider {
        Provider {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "Kofi Movers".to_string(),
            service_area: ServiceArea::Radius {
                center: PICKUP,
                radius_km: 50.0,
            },
            categories: smallvec![CompactString::from("furniture"), CompactString::from("boxes")],
            capacity_kg: Decimal::new(1000, 0),
            capacity_m3: Decimal::ZERO,
            min_job_value: Decimal::new(50, 0),
            availability: Vec::new(),
            verification_status: VerificationStatus::Verified,
            metrics: ProviderMetrics::default(),
            is_available: true,
            current_location: Some(GeoPoint::new(PICKUP.lat + offset_lat, PICKUP.lng)),
            last_location_update: Some(NOW - time::Duration::minutes(2)),
            auto_accept: false,
            registered_at: datetime!(2025-01-01 00:00 UTC),
        }
    }

    fn request() -> Request {
        Request {
            id: Uuid::nil(),
            request_code: "REQ20260304ABCD".into(),
            tracking_number: "MV-ABCDEFGH".into(),
            user_id: Uuid::nil(),
            request_type: RequestType::Instant,
            priority: RequestPriority::Standard,
            service_level: ServiceLevel::Standard,
            status: RequestStatus::Accepted,
            payment_status: RequestPaymentStatus::Completed,
            pickup_date: date!(2026 - 03 - 04),
            stops: Vec::new(),
            items: Vec::new(),
            estimated_weight_kg: None,
            estimated_distance_km: None,
            estimated_price: None,
            required_category: None,
            property: None,
            insurance: None,
            staff_count: 0,
            city: None,
            base_price: None,
            pricing_version: None,
            created_at: NOW,
            updated_at: NOW,
            submitted_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn test_filters() {
        let r = request();
        assert!(check_eligibility(&provider(0.01), &r, PICKUP, NOW, 10.0).is_ok());

        let mut p = provider(0.01);
        p.verification_status = VerificationStatus::Pending;
        assert_eq!(check_eligibility(&p, &r, PICKUP, NOW, 10.0), Err(Rejection::NotVerified));

        let mut p = provider(0.01);
        p.last_location_update = Some(NOW - time::Duration::minutes(11));
        assert_eq!(
            check_eligibility(&p, &r, PICKUP, NOW, 10.0),
            Err(Rejection::NoFreshLocation)
        );

        // ~0.2 degrees of latitude is about 22 km
        assert_eq!(
            check_eligibility(&provider(0.2), &r, PICKUP, NOW, 10.0),
            Err(Rejection::TooFar)
        );

        let mut heavy = request();
        heavy.estimated_weight_kg = Some(Decimal::new(1500, 0));
        assert_eq!(
            check_eligibility(&provider(0.01), &heavy, PICKUP, NOW, 10.0),
            Err(Rejection::OverCapacity)
        );

        let mut cheap = request();
        cheap.estimated_price = Some(Decimal::new(40, 0));
        assert_eq!(
            check_eligibility(&provider(0.01), &cheap, PICKUP, NOW, 10.0),
            Err(Rejection::BelowMinimumValue)
        );

        let mut piano = request();
        piano.required_category = Some("piano".into());
        assert_eq!(
            check_eligibility(&provider(0.01), &piano, PICKUP, NOW, 10.0),
            Err(Rejection::CategoryMismatch)
        );
    }

    #[test]
    fn test_score_components() {
        let mut p = provider(0.0);
        p.metrics = ProviderMetrics {
            avg_rating: 4.8,
            rating_count: 20,
            completion_rate: 96.0,
            avg_response_minutes: Some(4.0),
            response_count: 20,
            total_jobs: 250,
            completed_jobs: 240,
        };
        p.auto_accept = true;
        let s = ScoreBreakdown::compute(&p, 2.0, true);
        assert_eq!(s.distance, 24.0);
        assert_eq!(s.rating, 24.0);
        assert!((s.completion - 19.2).abs() < 1e-9);
        assert_eq!(s.response, 13.0);
        assert_eq!(s.experience, 10.0);
        assert_eq!(s.urgent_boost, 15.0);
        assert_eq!(s.auto_accept, 5.0);
        assert_eq!(s.specialist, 0.0);

        let fresh = ScoreBreakdown::compute(&provider(0.0), 12.0, false);
        assert_eq!(fresh.distance, 0.0);
        assert_eq!(fresh.response, 10.0);
        assert_eq!(fresh.urgent_boost, 0.0);
    }

    #[test]
    fn test_ranking_tie_breaks() {
        let candidate = |score, distance_km, registered: OffsetDateTime| {
            let mut provider = provider(0.0);
            provider.registered_at = registered;
            Candidate {
                provider,
                distance_km,
                score,
                breakdown: ScoreBreakdown::default(),
            }
        };
        let early = datetime!(2024-01-01 00:00 UTC);
        let late = datetime!(2025-06-01 00:00 UTC);
        let mut list = vec![
            candidate(50.0, 3.0, early),
            candidate(60.0, 9.0, late),
            candidate(50.0, 2.0, late),
            candidate(50.0, 2.0, early),
        ];
        rank_candidates(&mut list);
        let order: Vec<_> = list
            .iter()
            .map(|c| (c.score, c.distance_km, c.provider.registered_at))
            .collect();
        assert_eq!(
            order,
            vec![
                (60.0, 9.0, late),
                (50.0, 2.0, early),
                (50.0, 2.0, late),
                (50.0, 3.0, early),
            ]
        );
    }
}
