use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// What a rating is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RatingTarget {
    Service(Uuid),
    Provider(Uuid),
    Job(Uuid),
}

impl RatingTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            RatingTarget::Service(_) => "service",
            RatingTarget::Provider(_) => "provider",
            RatingTarget::Job(_) => "job",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            RatingTarget::Service(id) | RatingTarget::Provider(id) | RatingTarget::Job(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "service" => Some(RatingTarget::Service(id)),
            "provider" => Some(RatingTarget::Provider(id)),
            "job" => Some(RatingTarget::Job(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub id: Uuid,
    pub target: RatingTarget,
    pub rater: Uuid,
    /// 1..=5
    pub score: u8,
    pub comment: Option<String>,
    /// Reply from the rated party.
    pub response: Option<String>,
    pub created_at: OffsetDateTime,
}
