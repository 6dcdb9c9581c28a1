use compact_str::CompactString;
use haulage_sdk::objects::RequestStatus as SdkRequestStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "request_type")]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Instant,
    Biddable,
    Journey,
    WasteCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "request_priority")]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    Standard,
    Express,
    SameDay,
    Scheduled,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "service_level")]
#[serde(rename_all = "snake_case")]
pub enum ServiceLevel {
    Standard,
    Express,
    SameDay,
    Scheduled,
}

/// Request status for database operations.
///
/// This is the sqlx::Type version. For wire use, see
/// `haulage_sdk::objects::RequestStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "request_status")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    Bidding,
    PaymentCompleted,
    Accepted,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// Whether the request has been submitted and must carry a price.
    pub fn is_submitted(self) -> bool {
        !matches!(self, RequestStatus::Draft)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkRequestStatus::from(*self).fmt(f)
    }
}

impl From<RequestStatus> for SdkRequestStatus {
    fn from(value: RequestStatus) -> Self {
        match value {
            RequestStatus::Draft => SdkRequestStatus::Draft,
            RequestStatus::Pending => SdkRequestStatus::Pending,
            RequestStatus::Bidding => SdkRequestStatus::Bidding,
            RequestStatus::PaymentCompleted => SdkRequestStatus::PaymentCompleted,
            RequestStatus::Accepted => SdkRequestStatus::Accepted,
            RequestStatus::Assigned => SdkRequestStatus::Assigned,
            RequestStatus::InTransit => SdkRequestStatus::InTransit,
            RequestStatus::Completed => SdkRequestStatus::Completed,
            RequestStatus::Cancelled => SdkRequestStatus::Cancelled,
        }
    }
}

impl From<SdkRequestStatus> for RequestStatus {
    fn from(value: SdkRequestStatus) -> Self {
        match value {
            SdkRequestStatus::Draft => RequestStatus::Draft,
            SdkRequestStatus::Pending => RequestStatus::Pending,
            SdkRequestStatus::Bidding => RequestStatus::Bidding,
            SdkRequestStatus::PaymentCompleted => RequestStatus::PaymentCompleted,
            SdkRequestStatus::Accepted => RequestStatus::Accepted,
            SdkRequestStatus::Assigned => RequestStatus::Assigned,
            SdkRequestStatus::InTransit => RequestStatus::InTransit,
            SdkRequestStatus::Completed => RequestStatus::Completed,
            SdkRequestStatus::Cancelled => RequestStatus::Cancelled,
        }
    }
}

/// The request's view of its payments, derived from the latest Payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "request_payment_status")]
#[serde(rename_all = "snake_case")]
pub enum RequestPaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "stop_type")]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Pickup,
    Dropoff,
    Intermediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: Uuid,
    /// Dense 0..n-1 within the request.
    pub sequence: u32,
    pub stop_type: StopType,
    pub location: GeoPoint,
    pub address: String,
    pub scheduled_at: Option<OffsetDateTime>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    /// Pickup stop the item is collected from, if tracked per stop.
    pub stop_id: Option<Uuid>,
    pub name: String,
    pub quantity: u32,
    /// Per unit.
    pub weight_kg: Decimal,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    pub fragile: bool,
    pub needs_disassembly: bool,
    pub declared_value: Option<Decimal>,
}

impl Item {
    pub fn total_weight_kg(&self) -> Decimal {
        self.weight_kg * Decimal::from(self.quantity)
    }

    pub fn total_volume_m3(&self) -> Decimal {
        self.length_cm * self.width_cm * self.height_cm * Decimal::from(self.quantity)
            / Decimal::from(1_000_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Studio,
    Apartment,
    House,
    Office,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub property_type: PropertyType,
    pub rooms: u32,
    pub floor: u32,
    pub has_elevator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceRequest {
    pub declared_value: Decimal,
    pub premium_coverage: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Uuid,
    pub request_code: CompactString,
    pub tracking_number: CompactString,
    pub user_id: Uuid,
    pub request_type: RequestType,
    pub priority: RequestPriority,
    pub service_level: ServiceLevel,
    pub status: RequestStatus,
    pub payment_status: RequestPaymentStatus,
    pub pickup_date: Date,
    pub stops: Vec<Stop>,
    pub items: Vec<Item>,
    pub estimated_weight_kg: Option<Decimal>,
    pub estimated_distance_km: Option<Decimal>,
    /// Customer's budget; providers with a higher minimum job value are skipped.
    pub estimated_price: Option<Decimal>,
    pub required_category: Option<CompactString>,
    pub property: Option<PropertyDetails>,
    pub insurance: Option<InsuranceRequest>,
    pub staff_count: u8,
    /// Used for the weather lookup.
    pub city: Option<String>,
    /// Set exactly when the request has been submitted.
    pub base_price: Option<Decimal>,
    pub pricing_version: Option<u64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub submitted_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
}

impl Request {
    pub fn pickup(&self) -> Option<&Stop> {
        self.stops.iter().find(|s| s.stop_type == StopType::Pickup)
    }

    pub fn dropoff(&self) -> Option<&Stop> {
        self.stops
            .iter()
            .rev()
            .find(|s| s.stop_type == StopType::Dropoff)
    }

    pub fn route(&self) -> Vec<GeoPoint> {
        self.stops.iter().map(|s| s.location).collect()
    }

    /// Declared weight, or the sum over items when not declared.
    pub fn total_weight_kg(&self) -> Decimal {
        self.estimated_weight_kg
            .unwrap_or_else(|| self.items.iter().map(Item::total_weight_kg).sum())
    }

    pub fn total_volume_m3(&self) -> Decimal {
        self.items.iter().map(Item::total_volume_m3).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_urgent(&self) -> bool {
        self.priority == RequestPriority::Urgent
    }

    /// Renumber stops densely in their current order.
    pub fn renumber_stops(&mut self) {
        self.stops.sort_by_key(|s| s.sequence);
        for (i, stop) in self.stops.iter_mut().enumerate() {
            stop.sequence = i as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_volume_in_cubic_metres() {
        let item = Item {
            id: Uuid::nil(),
            stop_id: None,
            name: "box".to_string(),
            quantity: 2,
            weight_kg: Decimal::new(5, 0),
            length_cm: Decimal::new(100, 0),
            width_cm: Decimal::new(50, 0),
            height_cm: Decimal::new(40, 0),
            fragile: false,
            needs_disassembly: false,
            declared_value: None,
        };
        assert_eq!(item.total_volume_m3(), Decimal::new(4, 1));
        assert_eq!(item.total_weight_kg(), Decimal::new(10, 0));
    }

    #[test]
    fn test_status_display_matches_wire() {
        assert_eq!(RequestStatus::PaymentCompleted.to_string(), "payment_completed");
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Draft.is_submitted());
    }
}
