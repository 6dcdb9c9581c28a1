use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::{Payment, PaymentStatus, PaymentType};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;

const PAYMENT_COLUMNS: &str = "id, request_id, amount, currency, status, payment_type, \
    reference, intent_id, charge_id, authorization_url, refunded_amount, created_at, \
    updated_at, completed_at, last_polled_at, metadata";

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    request_id: Uuid,
    amount: Decimal,
    currency: String,
    status: PaymentStatus,
    payment_type: PaymentType,
    reference: String,
    intent_id: Option<String>,
    charge_id: Option<String>,
    authorization_url: Option<String>,
    refunded_amount: Decimal,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
    last_polled_at: Option<OffsetDateTime>,
    metadata: serde_json::Value,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            request_id: row.request_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            payment_type: row.payment_type,
            reference: row.reference,
            intent_id: row.intent_id,
            charge_id: row.charge_id,
            authorization_url: row.authorization_url,
            refunded_amount: row.refunded_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            last_polled_at: row.last_polled_at,
            metadata: row.metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsertPayment {
    pub payment: Payment,
}

impl Processor<InsertPayment> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPayment")]
    async fn process(&self, cmd: InsertPayment) -> Result<(), StoreError> {
        let p = cmd.payment;
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(p.id)
        .bind(p.request_id)
        .bind(p.amount)
        .bind(p.currency)
        .bind(p.status)
        .bind(p.payment_type)
        .bind(p.reference)
        .bind(p.intent_id)
        .bind(p.charge_id)
        .bind(p.authorization_url)
        .bind(p.refunded_amount)
        .bind(p.created_at)
        .bind(p.updated_at)
        .bind(p.completed_at)
        .bind(p.last_polled_at)
        .bind(p.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_unique_violation(e, "payment reference"))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentById {
    pub id: Uuid,
}

impl Processor<GetPaymentById> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentById")]
    async fn process(&self, query: GetPaymentById) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentByIntent {
    pub intent_id: String,
}

impl Processor<GetPaymentByIntent> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByIntent")]
    async fn process(&self, query: GetPaymentByIntent) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE intent_id = $1"
        ))
        .bind(query.intent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
pub struct GetLatestPaymentForRequest {
    pub request_id: Uuid,
}

impl Processor<GetLatestPaymentForRequest> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLatestPaymentForRequest")]
    async fn process(
        &self,
        query: GetLatestPaymentForRequest,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE request_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(query.request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
pub struct SavePayment {
    pub payment: Payment,
}

impl Processor<SavePayment> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:SavePayment")]
    async fn process(&self, cmd: SavePayment) -> Result<(), StoreError> {
        let p = cmd.payment;
        sqlx::query(
            r#"
            UPDATE payments SET
                status = $2, intent_id = $3, charge_id = $4, authorization_url = $5,
                refunded_amount = $6, updated_at = $7, completed_at = $8,
                last_polled_at = $9, metadata = $10
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(p.status)
        .bind(p.intent_id)
        .bind(p.charge_id)
        .bind(p.authorization_url)
        .bind(p.refunded_amount)
        .bind(p.updated_at)
        .bind(p.completed_at)
        .bind(p.last_polled_at)
        .bind(p.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
