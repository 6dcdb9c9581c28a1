use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use time::{OffsetDateTime, Weekday};
use uuid::Uuid;

use crate::geo::{GeoPoint, ServiceArea};

/// Locations older than this are not trusted for matching.
pub const LOCATION_STALE_AFTER: time::Duration = time::Duration::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "verification_status")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Premium,
}

impl VerificationStatus {
    pub fn is_verified(self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Premium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(value: Weekday) -> Self {
        match value {
            Weekday::Monday => DayOfWeek::Monday,
            Weekday::Tuesday => DayOfWeek::Tuesday,
            Weekday::Wednesday => DayOfWeek::Wednesday,
            Weekday::Thursday => DayOfWeek::Thursday,
            Weekday::Friday => DayOfWeek::Friday,
            Weekday::Saturday => DayOfWeek::Saturday,
            Weekday::Sunday => DayOfWeek::Sunday,
        }
    }
}

/// A weekly window, minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub day: DayOfWeek,
    pub start_minute: u16,
    pub end_minute: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// 0..=5
    pub avg_rating: f64,
    pub rating_count: u32,
    /// Percentage of finished jobs that completed, 0..=100.
    pub completion_rate: f64,
    /// `None` until the provider has answered an offer.
    pub avg_response_minutes: Option<f64>,
    pub response_count: u32,
    /// Finished jobs, completed or cancelled after assignment.
    pub total_jobs: u32,
    pub completed_jobs: u32,
}

impl ProviderMetrics {
    pub fn record_rating(&mut self, score: u8) {
        let n = f64::from(self.rating_count);
        self.avg_rating = (self.avg_rating * n + f64::from(score)) / (n + 1.0);
        self.rating_count += 1;
    }

    pub fn record_response(&mut self, minutes: f64) {
        let n = f64::from(self.response_count);
        let prev = self.avg_response_minutes.unwrap_or(0.0);
        self.avg_response_minutes = Some((prev * n + minutes.max(0.0)) / (n + 1.0));
        self.response_count += 1;
    }

    pub fn record_finished(&mut self, completed: bool) {
        self.total_jobs += 1;
        if completed {
            self.completed_jobs += 1;
        }
        self.completion_rate =
            f64::from(self.completed_jobs) / f64::from(self.total_jobs) * 100.0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub id: Uuid,
    /// Account that receives notifications.
    pub user_id: Uuid,
    pub name: String,
    pub service_area: ServiceArea,
    pub categories: SmallVec<[CompactString; 4]>,
    pub capacity_kg: Decimal,
    pub capacity_m3: Decimal,
    pub min_job_value: Decimal,
    /// Empty means always available.
    pub availability: Vec<AvailabilityWindow>,
    pub verification_status: VerificationStatus,
    pub metrics: ProviderMetrics,
    pub is_available: bool,
    pub current_location: Option<GeoPoint>,
    pub last_location_update: Option<OffsetDateTime>,
    pub auto_accept: bool,
    pub registered_at: OffsetDateTime,
}

impl Provider {
    pub fn works_on(&self, day: DayOfWeek) -> bool {
        self.availability.is_empty() || self.availability.iter().any(|w| w.day == day)
    }

    pub fn has_fresh_location(&self, now: OffsetDateTime) -> bool {
        self.current_location.is_some()
            && self
                .last_location_update
                .is_some_and(|at| now - at <= LOCATION_STALE_AFTER)
    }

    pub fn accepts_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c.as_str() == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_metrics() {
        let mut m = ProviderMetrics::default();
        m.record_rating(5);
        m.record_rating(3);
        assert_eq!(m.avg_rating, 4.0);

        m.record_response(4.0);
        m.record_response(8.0);
        assert_eq!(m.avg_response_minutes, Some(6.0));

        m.record_finished(true);
        m.record_finished(true);
        m.record_finished(false);
        m.record_finished(true);
        assert_eq!(m.total_jobs, 4);
        assert_eq!(m.completion_rate, 75.0);
    }
}
