use compact_str::CompactString;
use haulage_sdk::objects::JobStatus as SdkJobStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::clock::Actor;
use crate::entities::RequestPriority;

/// Job status for database operations.
///
/// This is the sqlx::Type version. For wire use, see
/// `haulage_sdk::objects::JobStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "job_status")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Pending,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Edges of the job state graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, InTransit)
                | (Assigned, Completed)
                | (Assigned, Cancelled)
                | (InTransit, Completed)
                | (InTransit, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkJobStatus::from(*self).fmt(f)
    }
}

impl From<JobStatus> for SdkJobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Draft => SdkJobStatus::Draft,
            JobStatus::Pending => SdkJobStatus::Pending,
            JobStatus::Assigned => SdkJobStatus::Assigned,
            JobStatus::InTransit => SdkJobStatus::InTransit,
            JobStatus::Completed => SdkJobStatus::Completed,
            JobStatus::Cancelled => SdkJobStatus::Cancelled,
        }
    }
}

impl From<SdkJobStatus> for JobStatus {
    fn from(value: SdkJobStatus) -> Self {
        match value {
            SdkJobStatus::Draft => JobStatus::Draft,
            SdkJobStatus::Pending => JobStatus::Pending,
            SdkJobStatus::Assigned => JobStatus::Assigned,
            SdkJobStatus::InTransit => JobStatus::InTransit,
            SdkJobStatus::Completed => JobStatus::Completed,
            SdkJobStatus::Cancelled => JobStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub job_number: CompactString,
    pub request_id: Uuid,
    /// What the provider is paid.
    pub price: Decimal,
    pub priority: RequestPriority,
    pub status: JobStatus,
    pub assigned_provider: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub assigned_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Pending && self.assigned_provider.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "timeline_event_type")]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Created,
    StatusChanged,
    OffersDispatched,
    Escalated,
    Rated,
}

/// Append-only audit record on a job.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub event_type: TimelineEventType,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub created_by: Actor,
}

impl TimelineEvent {
    pub fn new(
        job_id: Uuid,
        event_type: TimelineEventType,
        description: impl Into<String>,
        metadata: serde_json::Value,
        created_at: OffsetDateTime,
        created_by: Actor,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            event_type,
            description: description.into(),
            metadata,
            created_at,
            created_by,
        }
    }

    pub fn status_change(
        job_id: Uuid,
        previous: JobStatus,
        new: JobStatus,
        mut metadata: serde_json::Value,
        created_at: OffsetDateTime,
        created_by: Actor,
    ) -> Self {
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("previous_status".into(), previous.to_string().into());
            obj.insert("new_status".into(), new.to_string().into());
            obj.insert("actor".into(), created_by.to_string().into());
        }
        Self::new(
            job_id,
            TimelineEventType::StatusChanged,
            format!("{previous} -> {new}"),
            metadata,
            created_at,
            created_by,
        )
    }

    /// `(previous, new)` for status-change events.
    pub fn transition(&self) -> Option<(JobStatus, JobStatus)> {
        if self.event_type != TimelineEventType::StatusChanged {
            return None;
        }
        let parse = |key: &str| -> Option<JobStatus> {
            serde_json::from_value(self.metadata.get(key)?.clone()).ok()
        };
        Some((parse("previous_status")?, parse("new_status")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_transition_graph() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Assigned.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::InTransit));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_status_change_metadata_round_trips() {
        let event = TimelineEvent::status_change(
            Uuid::nil(),
            JobStatus::Assigned,
            JobStatus::Cancelled,
            serde_json::json!({ "reason": "customer changed plans" }),
            datetime!(2026-02-01 09:00 UTC),
            Actor::System,
        );
        assert_eq!(
            event.transition(),
            Some((JobStatus::Assigned, JobStatus::Cancelled))
        );
        assert_eq!(event.metadata["previous_status"], "assigned");
        assert_eq!(event.metadata["reason"], "customer changed plans");
    }
}
