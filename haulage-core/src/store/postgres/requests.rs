use std::collections::HashMap;

use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::types::Json;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{signed, unsigned};
use crate::entities::{
    InsuranceRequest, Item, PropertyDetails, Request, RequestPaymentStatus, RequestPriority,
    RequestStatus, RequestType, ServiceLevel, Stop, StopType,
};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use crate::geo::GeoPoint;

const REQUEST_COLUMNS: &str = "id, request_code, tracking_number, user_id, request_type, \
    priority, service_level, status, payment_status, pickup_date, estimated_weight_kg, \
    estimated_distance_km, estimated_price, required_category, property, insurance, \
    staff_count, city, base_price, pricing_version, created_at, updated_at, submitted_at, \
    cancelled_at, cancellation_reason";

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    request_code: String,
    tracking_number: String,
    user_id: Uuid,
    request_type: RequestType,
    priority: RequestPriority,
    service_level: ServiceLevel,
    status: RequestStatus,
    payment_status: RequestPaymentStatus,
    pickup_date: Date,
    estimated_weight_kg: Option<Decimal>,
    estimated_distance_km: Option<Decimal>,
    estimated_price: Option<Decimal>,
    required_category: Option<String>,
    property: Option<Json<PropertyDetails>>,
    insurance: Option<Json<InsuranceRequest>>,
    staff_count: i16,
    city: Option<String>,
    base_price: Option<Decimal>,
    pricing_version: Option<i64>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    submitted_at: Option<OffsetDateTime>,
    cancelled_at: Option<OffsetDateTime>,
    cancellation_reason: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct StopRow {
    id: Uuid,
    request_id: Uuid,
    sequence: i32,
    stop_type: StopType,
    lat: f64,
    lng: f64,
    address: String,
    scheduled_at: Option<OffsetDateTime>,
    instructions: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    request_id: Uuid,
    stop_id: Option<Uuid>,
    name: String,
    quantity: i32,
    weight_kg: Decimal,
    length_cm: Decimal,
    width_cm: Decimal,
    height_cm: Decimal,
    fragile: bool,
    needs_disassembly: bool,
    declared_value: Option<Decimal>,
}

impl RequestRow {
    fn into_request(self, stops: Vec<Stop>, items: Vec<Item>) -> Result<Request, StoreError> {
        Ok(Request {
            id: self.id,
            request_code: self.request_code.into(),
            tracking_number: self.tracking_number.into(),
            user_id: self.user_id,
            request_type: self.request_type,
            priority: self.priority,
            service_level: self.service_level,
            status: self.status,
            payment_status: self.payment_status,
            pickup_date: self.pickup_date,
            stops,
            items,
            estimated_weight_kg: self.estimated_weight_kg,
            estimated_distance_km: self.estimated_distance_km,
            estimated_price: self.estimated_price,
            required_category: self.required_category.map(Into::into),
            property: self.property.map(|p| p.0),
            insurance: self.insurance.map(|i| i.0),
            staff_count: unsigned(self.staff_count, "staff_count")?,
            city: self.city,
            base_price: self.base_price,
            pricing_version: self
                .pricing_version
                .map(|v| unsigned(v, "pricing_version"))
                .transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            submitted_at: self.submitted_at,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
        })
    }
}

impl TryFrom<StopRow> for Stop {
    type Error = StoreError;

    fn try_from(row: StopRow) -> Result<Self, Self::Error> {
        Ok(Stop {
            id: row.id,
            sequence: unsigned(row.sequence, "sequence")?,
            stop_type: row.stop_type,
            location: GeoPoint::new(row.lat, row.lng),
            address: row.address,
            scheduled_at: row.scheduled_at,
            instructions: row.instructions,
        })
    }
}

impl TryFrom<ItemRow> for Item {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: row.id,
            stop_id: row.stop_id,
            name: row.name,
            quantity: unsigned(row.quantity, "quantity")?,
            weight_kg: row.weight_kg,
            length_cm: row.length_cm,
            width_cm: row.width_cm,
            height_cm: row.height_cm,
            fragile: row.fragile,
            needs_disassembly: row.needs_disassembly,
            declared_value: row.declared_value,
        })
    }
}

/// Attach stops and items to each row.
async fn hydrate(
    executor: &sqlx::PgPool,
    rows: Vec<RequestRow>,
) -> Result<Vec<Request>, StoreError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let stop_rows = sqlx::query_as::<_, StopRow>(
        r#"
        SELECT id, request_id, sequence, stop_type, lat, lng, address, scheduled_at, instructions
        FROM request_stops
        WHERE request_id = ANY($1)
        ORDER BY request_id, sequence
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;
    let item_rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT id, request_id, stop_id, name, quantity, weight_kg, length_cm, width_cm,
               height_cm, fragile, needs_disassembly, declared_value
        FROM request_items
        WHERE request_id = ANY($1)
        ORDER BY request_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    let mut stops: HashMap<Uuid, Vec<Stop>> = HashMap::new();
    for row in stop_rows {
        stops.entry(row.request_id).or_default().push(row.try_into()?);
    }
    let mut items: HashMap<Uuid, Vec<Item>> = HashMap::new();
    for row in item_rows {
        items.entry(row.request_id).or_default().push(row.try_into()?);
    }

    rows.into_iter()
        .map(|row| {
            let id = row.id;
            row.into_request(
                stops.remove(&id).unwrap_or_default(),
                items.remove(&id).unwrap_or_default(),
            )
        })
        .collect()
}

async fn write_children(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request: &Request,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM request_stops WHERE request_id = $1")
        .bind(request.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM request_items WHERE request_id = $1")
        .bind(request.id)
        .execute(&mut **tx)
        .await?;

    if !request.stops.is_empty() {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO request_stops \
            (id, request_id, sequence, stop_type, lat, lng, address, scheduled_at, instructions) ",
        );
        query_builder.push_values(&request.stops, |mut b, stop| {
            b.push_bind(stop.id)
                .push_bind(request.id)
                .push_bind(signed(stop.sequence))
                .push_bind(stop.stop_type)
                .push_bind(stop.location.lat)
                .push_bind(stop.location.lng)
                .push_bind(stop.address.clone())
                .push_bind(stop.scheduled_at)
                .push_bind(stop.instructions.clone());
        });
        query_builder.build().execute(&mut **tx).await?;
    }

    if !request.items.is_empty() {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO request_items \
            (id, request_id, position, stop_id, name, quantity, weight_kg, length_cm, width_cm, \
            height_cm, fragile, needs_disassembly, declared_value) ",
        );
        query_builder.push_values(request.items.iter().enumerate(), |mut b, (position, item)| {
            b.push_bind(item.id)
                .push_bind(request.id)
                .push_bind(position as i32)
                .push_bind(item.stop_id)
                .push_bind(item.name.clone())
                .push_bind(signed(item.quantity))
                .push_bind(item.weight_kg)
                .push_bind(item.length_cm)
                .push_bind(item.width_cm)
                .push_bind(item.height_cm)
                .push_bind(item.fragile)
                .push_bind(item.needs_disassembly)
                .push_bind(item.declared_value);
        });
        query_builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub request: Request,
}

impl Processor<InsertRequest> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertRequest")]
    async fn process(&self, cmd: InsertRequest) -> Result<(), StoreError> {
        let r = &cmd.request;
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO requests (
                id, request_code, tracking_number, user_id, request_type, priority,
                service_level, status, payment_status, pickup_date, estimated_weight_kg,
                estimated_distance_km, estimated_price, required_category, property, insurance,
                staff_count, city, base_price, pricing_version, created_at, updated_at,
                submitted_at, cancelled_at, cancellation_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(r.id)
        .bind(r.request_code.as_str())
        .bind(r.tracking_number.as_str())
        .bind(r.user_id)
        .bind(r.request_type)
        .bind(r.priority)
        .bind(r.service_level)
        .bind(r.status)
        .bind(r.payment_status)
        .bind(r.pickup_date)
        .bind(r.estimated_weight_kg)
        .bind(r.estimated_distance_km)
        .bind(r.estimated_price)
        .bind(r.required_category.as_ref().map(|c| c.as_str()))
        .bind(r.property.map(Json))
        .bind(r.insurance.map(Json))
        .bind(i16::from(r.staff_count))
        .bind(r.city.as_deref())
        .bind(r.base_price)
        .bind(r.pricing_version.map(|v| v as i64))
        .bind(r.created_at)
        .bind(r.updated_at)
        .bind(r.submitted_at)
        .bind(r.cancelled_at)
        .bind(r.cancellation_reason.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_unique_violation(e, "tracking_number"))?;
        write_children(&mut tx, r).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Overwrite a request row and replace its stops and items.
pub struct SaveRequest {
    pub request: Request,
}

impl Processor<SaveRequest> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:SaveRequest")]
    async fn process(&self, cmd: SaveRequest) -> Result<(), StoreError> {
        let r = &cmd.request;
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            UPDATE requests SET
                priority = $2, service_level = $3, status = $4, payment_status = $5,
                pickup_date = $6, estimated_weight_kg = $7, estimated_distance_km = $8,
                estimated_price = $9, required_category = $10, property = $11, insurance = $12,
                staff_count = $13, city = $14, base_price = $15, pricing_version = $16,
                updated_at = $17, submitted_at = $18, cancelled_at = $19,
                cancellation_reason = $20
            WHERE id = $1
            "#,
        )
        .bind(r.id)
        .bind(r.priority)
        .bind(r.service_level)
        .bind(r.status)
        .bind(r.payment_status)
        .bind(r.pickup_date)
        .bind(r.estimated_weight_kg)
        .bind(r.estimated_distance_km)
        .bind(r.estimated_price)
        .bind(r.required_category.as_ref().map(|c| c.as_str()))
        .bind(r.property.map(Json))
        .bind(r.insurance.map(Json))
        .bind(i16::from(r.staff_count))
        .bind(r.city.as_deref())
        .bind(r.base_price)
        .bind(r.pricing_version.map(|v| v as i64))
        .bind(r.updated_at)
        .bind(r.submitted_at)
        .bind(r.cancelled_at)
        .bind(r.cancellation_reason.as_deref())
        .execute(&mut *tx)
        .await?;
        write_children(&mut tx, r).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GetRequestById {
    pub id: Uuid,
}

impl Processor<GetRequestById> for DatabaseProcessor {
    type Output = Option<Request>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRequestById")]
    async fn process(&self, query: GetRequestById) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hydrate(&self.pool, row.into_iter().collect()).await?.pop())
    }
}

#[derive(Debug, Clone)]
pub struct GetRequestByTrackingNumber {
    pub tracking_number: String,
}

impl Processor<GetRequestByTrackingNumber> for DatabaseProcessor {
    type Output = Option<Request>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRequestByTrackingNumber")]
    async fn process(
        &self,
        query: GetRequestByTrackingNumber,
    ) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE tracking_number = $1"
        ))
        .bind(query.tracking_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hydrate(&self.pool, row.into_iter().collect()).await?.pop())
    }
}

#[derive(Debug, Clone)]
/// Requests the reconciler looks at, oldest first.
pub struct ListRequestsForReconciliation {
    pub since: OffsetDateTime,
}

impl Processor<ListRequestsForReconciliation> for DatabaseProcessor {
    type Output = Vec<Request>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListRequestsForReconciliation")]
    async fn process(
        &self,
        query: ListRequestsForReconciliation,
    ) -> Result<Vec<Request>, StoreError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM requests
            WHERE created_at >= $1
              AND (status IN ('pending', 'bidding', 'payment_completed')
                   OR payment_status = 'pending')
            ORDER BY created_at ASC
            "#
        ))
        .bind(query.since)
        .fetch_all(&self.pool)
        .await?;
        hydrate(&self.pool, rows).await
    }
}
