use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::offers::{OFFER_COLUMNS, OfferRow, into_offers};
use super::unsigned;
use crate::entities::{
    Job, JobStatus, Offer, OfferResponse, RequestPriority, RequestStatus, TimelineEvent,
    TimelineEventType,
};
use crate::error::StoreError;
use crate::framework::{DatabaseProcessor, PgTransaction};
use crate::store::{
    AcceptOutcome, Acceptance, JobCreation, JobTransition, TransitionOutcome, apply_job_status,
};

const JOB_COLUMNS: &str = "id, job_number, request_id, price, priority, status, \
    assigned_provider, created_at, updated_at, assigned_at, started_at, completed_at, \
    cancelled_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_number: String,
    request_id: Uuid,
    price: Decimal,
    priority: RequestPriority,
    status: JobStatus,
    assigned_provider: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    assigned_at: Option<OffsetDateTime>,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    cancelled_at: Option<OffsetDateTime>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            job_number: row.job_number.into(),
            request_id: row.request_id,
            price: row.price,
            priority: row.priority,
            status: row.status,
            assigned_provider: row.assigned_provider,
            created_at: row.created_at,
            updated_at: row.updated_at,
            assigned_at: row.assigned_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TimelineRow {
    id: Uuid,
    job_id: Uuid,
    event_type: TimelineEventType,
    description: String,
    metadata: serde_json::Value,
    created_at: OffsetDateTime,
    created_by: String,
}

impl TryFrom<TimelineRow> for TimelineEvent {
    type Error = StoreError;

    fn try_from(row: TimelineRow) -> Result<Self, Self::Error> {
        Ok(TimelineEvent {
            id: row.id,
            job_id: row.job_id,
            event_type: row.event_type,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            created_by: row
                .created_by
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("timeline {}: {e}", row.id)))?,
        })
    }
}

async fn lock_job(tx: &mut PgTransaction, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"
    ))
    .bind(job_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Into::into))
}

async fn write_job_state(tx: &mut PgTransaction, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            status = $2, assigned_provider = $3, updated_at = $4, assigned_at = $5,
            started_at = $6, completed_at = $7, cancelled_at = $8
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(job.status)
    .bind(job.assigned_provider)
    .bind(job.updated_at)
    .bind(job.assigned_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.cancelled_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn set_request_status(
    tx: &mut PgTransaction,
    request_id: Uuid,
    status: RequestStatus,
    at: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE requests
        SET status = $2,
            updated_at = $3,
            cancelled_at = CASE WHEN $2 = 'cancelled'::request_status
                                THEN COALESCE(cancelled_at, $3) ELSE cancelled_at END
        WHERE id = $1
        "#,
    )
    .bind(request_id)
    .bind(status)
    .bind(at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Expire the pending offers on `job_id`, except `keep`.
async fn expire_pending_offers(
    tx: &mut PgTransaction,
    job_id: Uuid,
    keep: Option<Uuid>,
    at: OffsetDateTime,
) -> Result<Vec<Offer>, StoreError> {
    let rows = sqlx::query_as::<_, OfferRow>(&format!(
        r#"
        UPDATE offers
        SET response = 'expired', responded_at = $3
        WHERE job_id = $1
          AND response = 'pending'
          AND ($2::uuid IS NULL OR id <> $2)
        RETURNING {OFFER_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(keep)
    .bind(at)
    .fetch_all(&mut **tx)
    .await?;
    into_offers(rows)
}

pub(super) async fn insert_timeline(
    executor: impl sqlx::PgExecutor<'_>,
    event: &TimelineEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_timeline_events
            (id, job_id, event_type, description, metadata, created_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id)
    .bind(event.job_id)
    .bind(event.event_type)
    .bind(event.description.as_str())
    .bind(&event.metadata)
    .bind(event.created_at)
    .bind(event.created_by.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GetJobById {
    pub id: Uuid,
}

impl Processor<GetJobById> for DatabaseProcessor {
    type Output = Option<Job>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetJobById")]
    async fn process(&self, query: GetJobById) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
pub struct GetJobByRequest {
    pub request_id: Uuid,
}

impl Processor<GetJobByRequest> for DatabaseProcessor {
    type Output = Option<Job>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetJobByRequest")]
    async fn process(&self, query: GetJobByRequest) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"
        ))
        .bind(query.request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
pub struct CountJobsWithPrefix {
    pub prefix: String,
}

impl Processor<CountJobsWithPrefix> for DatabaseProcessor {
    type Output = u32;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CountJobsWithPrefix")]
    async fn process(&self, query: CountJobsWithPrefix) -> Result<u32, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE starts_with(job_number, $1)")
                .bind(query.prefix)
                .fetch_one(&self.pool)
                .await?;
        unsigned(count, "job count")
    }
}

#[derive(Debug, Clone)]
/// Insert a job for a settled request, move the request on and record the
/// `created` timeline event, all in one transaction.
pub struct CreateJobForRequest {
    pub job: Job,
    pub request_status: RequestStatus,
    pub event: TimelineEvent,
}

impl Processor<CreateJobForRequest> for DatabaseProcessor {
    type Output = JobCreation;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CreateJobForRequest")]
    async fn process(&self, cmd: CreateJobForRequest) -> Result<JobCreation, StoreError> {
        let job = cmd.job;
        let mut tx = self.begin().await?;

        // serialise creators of the same request on the request row
        sqlx::query("SELECT id FROM requests WHERE id = $1 FOR UPDATE")
            .bind(job.request_id)
            .execute(&mut *tx)
            .await?;
        let existing = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"
        ))
        .bind(job.request_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing {
            return Ok(JobCreation::Existing(existing.into()));
        }

        sqlx::query(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(job.id)
        .bind(job.job_number.as_str())
        .bind(job.request_id)
        .bind(job.price)
        .bind(job.priority)
        .bind(job.status)
        .bind(job.assigned_provider)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.assigned_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.cancelled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_unique_violation(e, "job_number"))?;

        set_request_status(&mut tx, job.request_id, cmd.request_status, job.created_at).await?;
        insert_timeline(&mut *tx, &cmd.event).await?;
        tx.commit().await?;
        Ok(JobCreation::Created(job))
    }
}

#[derive(Debug, Clone)]
pub struct TransitionJob {
    pub transition: JobTransition,
}

impl Processor<TransitionJob> for DatabaseProcessor {
    type Output = TransitionOutcome;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:TransitionJob")]
    async fn process(&self, cmd: TransitionJob) -> Result<TransitionOutcome, StoreError> {
        let t = cmd.transition;
        let mut tx = self.begin().await?;
        let Some(mut job) = lock_job(&mut tx, t.job_id).await? else {
            return Err(StoreError::Corrupt(format!(
                "job {} vanished during transition",
                t.job_id
            )));
        };
        if job.status != t.from {
            return Ok(TransitionOutcome::Stale(job.status));
        }
        apply_job_status(&mut job, t.to, t.at);
        write_job_state(&mut tx, &job).await?;

        let expired_offers = if t.expire_pending_offers {
            expire_pending_offers(&mut tx, job.id, None, t.at).await?
        } else {
            Vec::new()
        };
        if let Some((request_id, status)) = t.request_status {
            set_request_status(&mut tx, request_id, status, t.at).await?;
        }
        insert_timeline(&mut *tx, &t.event).await?;
        tx.commit().await?;
        Ok(TransitionOutcome::Applied {
            job,
            expired_offers,
        })
    }
}

#[derive(Debug, Clone)]
/// First-accept-wins assignment.
///
/// Locks the job row, then the offer row; a second acceptor blocks on the
/// job row and finds it assigned.
pub struct CommitAcceptance {
    pub acceptance: Acceptance,
}

impl Processor<CommitAcceptance> for DatabaseProcessor {
    type Output = AcceptOutcome;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:CommitAcceptance")]
    async fn process(&self, cmd: CommitAcceptance) -> Result<AcceptOutcome, StoreError> {
        let a = cmd.acceptance;
        let mut tx = self.begin().await?;

        let Some(mut job) = lock_job(&mut tx, a.job_id).await? else {
            return Ok(AcceptOutcome::JobUnavailable);
        };
        let offer = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1 FOR UPDATE"
        ))
        .bind(a.offer_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Offer::try_from)
        .transpose()?;
        let Some(mut offer) = offer.filter(|o| o.job_id == a.job_id && o.is_open(a.at)) else {
            return Ok(AcceptOutcome::OfferUnavailable);
        };

        let request_status: Option<RequestStatus> =
            sqlx::query_scalar("SELECT status FROM requests WHERE id = $1 FOR UPDATE")
                .bind(a.request_id)
                .fetch_optional(&mut *tx)
                .await?;
        let request_open = matches!(
            request_status,
            Some(RequestStatus::Pending | RequestStatus::Bidding | RequestStatus::Accepted)
        );
        if !job.is_open() || !request_open {
            return Ok(AcceptOutcome::JobUnavailable);
        }

        sqlx::query("UPDATE offers SET response = $2, responded_at = $3 WHERE id = $1")
            .bind(offer.id)
            .bind(OfferResponse::Accepted)
            .bind(a.at)
            .execute(&mut *tx)
            .await?;
        offer.response = OfferResponse::Accepted;
        offer.responded_at = Some(a.at);

        job.assigned_provider = Some(offer.provider_id);
        apply_job_status(&mut job, JobStatus::Assigned, a.at);
        write_job_state(&mut tx, &job).await?;

        let expired_offers = expire_pending_offers(&mut tx, job.id, Some(offer.id), a.at).await?;
        set_request_status(&mut tx, a.request_id, RequestStatus::Assigned, a.at).await?;
        insert_timeline(&mut *tx, &a.event).await?;
        tx.commit().await?;

        Ok(AcceptOutcome::Accepted {
            job,
            offer,
            expired_offers,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppendTimelineEvent {
    pub event: TimelineEvent,
}

impl Processor<AppendTimelineEvent> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:AppendTimelineEvent")]
    async fn process(&self, cmd: AppendTimelineEvent) -> Result<(), StoreError> {
        insert_timeline(&self.pool, &cmd.event).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ListTimelineForJob {
    pub job_id: Uuid,
}

impl Processor<ListTimelineForJob> for DatabaseProcessor {
    type Output = Vec<TimelineEvent>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListTimelineForJob")]
    async fn process(&self, query: ListTimelineForJob) -> Result<Vec<TimelineEvent>, StoreError> {
        let rows = sqlx::query_as::<_, TimelineRow>(
            r#"
            SELECT id, job_id, event_type, description, metadata, created_at, created_by
            FROM job_timeline_events
            WHERE job_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(query.job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TimelineEvent::try_from).collect()
    }
}
