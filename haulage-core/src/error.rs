use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a repository adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Postgres reports unique violations as SQLSTATE 23505.
    pub fn from_unique_violation(e: sqlx::Error, what: &str) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(what.to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

/// Errors raised by an external collaborator (payment processor, weather,
/// geo, notification transport).
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("operation not supported")]
    Unsupported,
}

/// Engine-wide error kinds.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} cannot {action} from {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("no active pricing configuration")]
    ConfigurationMissing,

    #[error("timed out waiting for lock on {key}")]
    ContentionTimeout { key: String },

    #[error("payment oracle unavailable: {0}")]
    PaymentUnavailable(#[source] OracleError),

    #[error("job {job_id} is no longer available")]
    StaleAssignment { job_id: Uuid },

    #[error("reconciliation error: {0}")]
    Reconciliation(String),

    #[error("notification failed: {0}")]
    NotifyFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How an error is presented to whoever called the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// The request was wrong; retrying it unchanged will fail again.
    Rejected,
    /// Transient; safe to retry.
    RetryLater,
    /// The job was taken by another provider.
    NoLongerAvailable,
    /// Anything else, reported generically and retryable.
    Internal,
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DispatchError::InvalidInput(msg.into())
    }

    pub fn surface(&self) -> Surface {
        match self {
            DispatchError::InvalidInput(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::NotFound { .. } => Surface::Rejected,
            DispatchError::ContentionTimeout { .. } => Surface::RetryLater,
            DispatchError::StaleAssignment { .. } => Surface::NoLongerAvailable,
            DispatchError::ConfigurationMissing
            | DispatchError::PaymentUnavailable(_)
            | DispatchError::Reconciliation(_)
            | DispatchError::NotifyFailed(_)
            | DispatchError::Cancelled
            | DispatchError::Store(_) => Surface::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_classes() {
        assert_eq!(DispatchError::invalid("x").surface(), Surface::Rejected);
        assert_eq!(
            DispatchError::ContentionTimeout { key: "k".into() }.surface(),
            Surface::RetryLater
        );
        assert_eq!(
            DispatchError::StaleAssignment { job_id: Uuid::nil() }.surface(),
            Surface::NoLongerAvailable
        );
        assert_eq!(
            DispatchError::Store(StoreError::Conflict("job_number".into())).surface(),
            Surface::Internal
        );
    }
}
