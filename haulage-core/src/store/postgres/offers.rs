use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{signed, unsigned};
use crate::entities::{Offer, OfferResponse};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;

pub(super) const OFFER_COLUMNS: &str = "id, job_id, provider_id, offered_price, distance_km, \
    estimated_duration_minutes, score, rank, created_at, expires_at, response, responded_at";

#[derive(Debug, sqlx::FromRow)]
pub(super) struct OfferRow {
    id: Uuid,
    job_id: Uuid,
    provider_id: Uuid,
    offered_price: Decimal,
    distance_km: f64,
    estimated_duration_minutes: i32,
    score: f64,
    rank: i32,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    response: OfferResponse,
    responded_at: Option<OffsetDateTime>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        Ok(Offer {
            id: row.id,
            job_id: row.job_id,
            provider_id: row.provider_id,
            offered_price: row.offered_price,
            distance_km: row.distance_km,
            estimated_duration_minutes: unsigned(
                row.estimated_duration_minutes,
                "estimated_duration_minutes",
            )?,
            score: row.score,
            rank: unsigned(row.rank, "rank")?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            response: row.response,
            responded_at: row.responded_at,
        })
    }
}

pub(super) fn into_offers(rows: Vec<OfferRow>) -> Result<Vec<Offer>, StoreError> {
    rows.into_iter().map(Offer::try_from).collect()
}

#[derive(Debug, Clone)]
/// Insert offers, skipping (job, provider) pairs that already have one.
pub struct InsertOffers {
    pub offers: Vec<Offer>,
}

impl Processor<InsertOffers> for DatabaseProcessor {
    type Output = Vec<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertOffers")]
    async fn process(&self, cmd: InsertOffers) -> Result<Vec<Offer>, StoreError> {
        if cmd.offers.is_empty() {
            return Ok(Vec::new());
        }
        let mut query_builder = sqlx::QueryBuilder::new(format!("INSERT INTO offers ({OFFER_COLUMNS}) "));
        query_builder.push_values(cmd.offers, |mut b, offer| {
            b.push_bind(offer.id)
                .push_bind(offer.job_id)
                .push_bind(offer.provider_id)
                .push_bind(offer.offered_price)
                .push_bind(offer.distance_km)
                .push_bind(signed(offer.estimated_duration_minutes))
                .push_bind(offer.score)
                .push_bind(signed(offer.rank))
                .push_bind(offer.created_at)
                .push_bind(offer.expires_at)
                .push_bind(offer.response)
                .push_bind(offer.responded_at);
        });
        query_builder.push(" ON CONFLICT (job_id, provider_id) DO NOTHING RETURNING ");
        query_builder.push(OFFER_COLUMNS);
        let rows = query_builder
            .build_query_as::<OfferRow>()
            .fetch_all(&self.pool)
            .await?;
        into_offers(rows)
    }
}

#[derive(Debug, Clone)]
pub struct GetOfferById {
    pub id: Uuid,
}

impl Processor<GetOfferById> for DatabaseProcessor {
    type Output = Option<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOfferById")]
    async fn process(&self, query: GetOfferById) -> Result<Option<Offer>, StoreError> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Offer::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
pub struct ListOffersForJob {
    pub job_id: Uuid,
}

impl Processor<ListOffersForJob> for DatabaseProcessor {
    type Output = Vec<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListOffersForJob")]
    async fn process(&self, query: ListOffersForJob) -> Result<Vec<Offer>, StoreError> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE job_id = $1 ORDER BY rank, created_at"
        ))
        .bind(query.job_id)
        .fetch_all(&self.pool)
        .await?;
        into_offers(rows)
    }
}

#[derive(Debug, Clone)]
pub struct ListPendingOffersForProvider {
    pub provider_id: Uuid,
}

impl Processor<ListPendingOffersForProvider> for DatabaseProcessor {
    type Output = Vec<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPendingOffersForProvider")]
    async fn process(&self, query: ListPendingOffersForProvider) -> Result<Vec<Offer>, StoreError> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            r#"
            SELECT {OFFER_COLUMNS}
            FROM offers
            WHERE provider_id = $1 AND response = 'pending'
            ORDER BY created_at, id
            "#
        ))
        .bind(query.provider_id)
        .fetch_all(&self.pool)
        .await?;
        into_offers(rows)
    }
}

#[derive(Debug, Clone)]
/// Pending offers whose deadline has passed.
pub struct ListExpiredPendingOffers {
    pub now: OffsetDateTime,
}

impl Processor<ListExpiredPendingOffers> for DatabaseProcessor {
    type Output = Vec<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListExpiredPendingOffers")]
    async fn process(&self, query: ListExpiredPendingOffers) -> Result<Vec<Offer>, StoreError> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            r#"
            SELECT {OFFER_COLUMNS}
            FROM offers
            WHERE response = 'pending' AND expires_at < $1
            ORDER BY expires_at
            "#
        ))
        .bind(query.now)
        .fetch_all(&self.pool)
        .await?;
        into_offers(rows)
    }
}

#[derive(Debug, Clone)]
pub struct ListOverloadedProviders {
    pub at_least: usize,
}

impl Processor<ListOverloadedProviders> for DatabaseProcessor {
    type Output = Vec<Uuid>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListOverloadedProviders")]
    async fn process(&self, query: ListOverloadedProviders) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT provider_id
            FROM offers
            WHERE response = 'pending'
            GROUP BY provider_id
            HAVING COUNT(*) >= $1
            ORDER BY provider_id
            "#,
        )
        .bind(query.at_least as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[derive(Debug, Clone)]
/// Compare-and-set on a pending offer.
pub struct ResolveOffer {
    pub offer_id: Uuid,
    pub response: OfferResponse,
    pub at: OffsetDateTime,
}

impl Processor<ResolveOffer> for DatabaseProcessor {
    type Output = Option<Offer>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ResolveOffer")]
    async fn process(&self, cmd: ResolveOffer) -> Result<Option<Offer>, StoreError> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            r#"
            UPDATE offers
            SET response = $2, responded_at = $3
            WHERE id = $1 AND response = 'pending'
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(cmd.offer_id)
        .bind(cmd.response)
        .bind(cmd.at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Offer::try_from).transpose()
    }
}
