use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use super::unsigned;
use crate::entities::{AvailabilityWindow, Provider, ProviderMetrics, VerificationStatus};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use crate::geo::{BoundingBox, GeoPoint, ServiceArea, haversine_km};
use crate::store::MetricsUpdate;

const PROVIDER_COLUMNS: &str = "id, user_id, name, service_area, categories, capacity_kg, \
    capacity_m3, min_job_value, availability, verification_status, metrics, is_available, \
    lat, lng, last_location_update, auto_accept, registered_at";

#[derive(Debug, sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    service_area: Json<ServiceArea>,
    categories: Vec<String>,
    capacity_kg: Decimal,
    capacity_m3: Decimal,
    min_job_value: Decimal,
    availability: Json<Vec<AvailabilityWindow>>,
    verification_status: VerificationStatus,
    metrics: Json<ProviderMetrics>,
    is_available: bool,
    lat: Option<f64>,
    lng: Option<f64>,
    last_location_update: Option<OffsetDateTime>,
    auto_accept: bool,
    registered_at: OffsetDateTime,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        Provider {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            service_area: row.service_area.0,
            categories: row.categories.into_iter().map(Into::into).collect(),
            capacity_kg: row.capacity_kg,
            capacity_m3: row.capacity_m3,
            min_job_value: row.min_job_value,
            availability: row.availability.0,
            verification_status: row.verification_status,
            metrics: row.metrics.0,
            is_available: row.is_available,
            current_location: row.lat.zip(row.lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
            last_location_update: row.last_location_update,
            auto_accept: row.auto_accept,
            registered_at: row.registered_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertProvider {
    pub provider: Provider,
}

impl Processor<UpsertProvider> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertProvider")]
    async fn process(&self, cmd: UpsertProvider) -> Result<(), StoreError> {
        let p = cmd.provider;
        let categories: Vec<String> = p.categories.iter().map(|c| c.to_string()).collect();
        sqlx::query(&format!(
            r#"
            INSERT INTO providers ({PROVIDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                service_area = EXCLUDED.service_area,
                categories = EXCLUDED.categories,
                capacity_kg = EXCLUDED.capacity_kg,
                capacity_m3 = EXCLUDED.capacity_m3,
                min_job_value = EXCLUDED.min_job_value,
                availability = EXCLUDED.availability,
                verification_status = EXCLUDED.verification_status,
                metrics = EXCLUDED.metrics,
                is_available = EXCLUDED.is_available,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                last_location_update = EXCLUDED.last_location_update,
                auto_accept = EXCLUDED.auto_accept
            "#
        ))
        .bind(p.id)
        .bind(p.user_id)
        .bind(p.name)
        .bind(Json(p.service_area))
        .bind(categories)
        .bind(p.capacity_kg)
        .bind(p.capacity_m3)
        .bind(p.min_job_value)
        .bind(Json(p.availability))
        .bind(p.verification_status)
        .bind(Json(p.metrics))
        .bind(p.is_available)
        .bind(p.current_location.map(|l| l.lat))
        .bind(p.current_location.map(|l| l.lng))
        .bind(p.last_location_update)
        .bind(p.auto_accept)
        .bind(p.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GetProviderById {
    pub id: Uuid,
}

impl Processor<GetProviderById> for DatabaseProcessor {
    type Output = Option<Provider>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetProviderById")]
    async fn process(&self, query: GetProviderById) -> Result<Option<Provider>, StoreError> {
        let row = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
/// Providers located within `radius_km` of `center`.
///
/// The bounding box is resolved by the `(lat, lng)` index; the exact
/// great-circle test runs on the survivors.
pub struct ListProvidersWithinRadius {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl Processor<ListProvidersWithinRadius> for DatabaseProcessor {
    type Output = Vec<Provider>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListProvidersWithinRadius")]
    async fn process(&self, query: ListProvidersWithinRadius) -> Result<Vec<Provider>, StoreError> {
        let bbox = BoundingBox::around(&query.center, query.radius_km);
        let rows = sqlx::query_as::<_, ProviderRow>(&format!(
            r#"
            SELECT {PROVIDER_COLUMNS}
            FROM providers
            WHERE lat BETWEEN $1 AND $2
              AND lng BETWEEN $3 AND $4
            "#
        ))
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(Provider::from)
            .filter(|p| {
                p.current_location
                    .is_some_and(|loc| haversine_km(&query.center, &loc) <= query.radius_km)
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct CountActiveJobsForProvider {
    pub provider_id: Uuid,
}

impl Processor<CountActiveJobsForProvider> for DatabaseProcessor {
    type Output = u32;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CountActiveJobsForProvider")]
    async fn process(&self, query: CountActiveJobsForProvider) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM jobs
            WHERE assigned_provider = $1
              AND status IN ('assigned', 'in_transit')
            "#,
        )
        .bind(query.provider_id)
        .fetch_one(&self.pool)
        .await?;
        unsigned(count, "active job count")
    }
}

#[derive(Debug, Clone)]
/// Fold one observation into a provider's rolling metrics under a row lock.
pub struct UpdateProviderMetrics {
    pub provider_id: Uuid,
    pub update: MetricsUpdate,
}

impl Processor<UpdateProviderMetrics> for DatabaseProcessor {
    type Output = Option<ProviderMetrics>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateProviderMetrics")]
    async fn process(
        &self,
        cmd: UpdateProviderMetrics,
    ) -> Result<Option<ProviderMetrics>, StoreError> {
        let mut tx = self.begin().await?;
        let current: Option<Json<ProviderMetrics>> =
            sqlx::query_scalar("SELECT metrics FROM providers WHERE id = $1 FOR UPDATE")
                .bind(cmd.provider_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(Json(mut metrics)) = current else {
            return Ok(None);
        };
        cmd.update.apply(&mut metrics);
        sqlx::query("UPDATE providers SET metrics = $2 WHERE id = $1")
            .bind(cmd.provider_id)
            .bind(Json(metrics))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(metrics))
    }
}
