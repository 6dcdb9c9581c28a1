use haulage_sdk::objects::OfferResponse as SdkOfferResponse;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "offer_response")]
#[serde(rename_all = "snake_case")]
pub enum OfferResponse {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl From<OfferResponse> for SdkOfferResponse {
    fn from(value: OfferResponse) -> Self {
        match value {
            OfferResponse::Pending => SdkOfferResponse::Pending,
            OfferResponse::Accepted => SdkOfferResponse::Accepted,
            OfferResponse::Declined => SdkOfferResponse::Declined,
            OfferResponse::Expired => SdkOfferResponse::Expired,
        }
    }
}

impl std::fmt::Display for OfferResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkOfferResponse::from(*self).fmt(f)
    }
}

/// A time-limited proposal of one job to one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: Uuid,
    pub job_id: Uuid,
    pub provider_id: Uuid,
    pub offered_price: Decimal,
    pub distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub score: f64,
    /// 1-based position in the ranking that produced this offer.
    pub rank: u32,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub response: OfferResponse,
    pub responded_at: Option<OffsetDateTime>,
}

impl Offer {
    pub fn is_open(&self, now: OffsetDateTime) -> bool {
        self.response == OfferResponse::Pending && self.expires_at >= now
    }
}
