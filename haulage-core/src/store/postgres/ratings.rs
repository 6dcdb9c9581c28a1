use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

use super::unsigned;
use crate::entities::{Rating, RatingTarget};
use crate::error::StoreError;
use crate::framework::DatabaseProcessor;

#[derive(Debug, sqlx::FromRow)]
struct RatingRow {
    id: Uuid,
    target_kind: String,
    target_id: Uuid,
    rater: Uuid,
    score: i16,
    comment: Option<String>,
    response: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<RatingRow> for Rating {
    type Error = StoreError;

    fn try_from(row: RatingRow) -> Result<Self, Self::Error> {
        let target = RatingTarget::from_parts(&row.target_kind, row.target_id).ok_or_else(|| {
            StoreError::Corrupt(format!("rating {}: unknown target {}", row.id, row.target_kind))
        })?;
        Ok(Rating {
            id: row.id,
            target,
            rater: row.rater,
            score: unsigned(row.score, "score")?,
            comment: row.comment,
            response: row.response,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct InsertRating {
    pub rating: Rating,
}

impl Processor<InsertRating> for DatabaseProcessor {
    type Output = ();
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertRating")]
    async fn process(&self, cmd: InsertRating) -> Result<(), StoreError> {
        let r = cmd.rating;
        sqlx::query(
            r#"
            INSERT INTO ratings
                (id, target_kind, target_id, rater, score, comment, response, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(r.id)
        .bind(r.target.kind())
        .bind(r.target.id())
        .bind(r.rater)
        .bind(i16::from(r.score))
        .bind(r.comment)
        .bind(r.response)
        .bind(r.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_unique_violation(e, "rating"))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ListRatingsForTarget {
    pub target: RatingTarget,
}

impl Processor<ListRatingsForTarget> for DatabaseProcessor {
    type Output = Vec<Rating>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListRatingsForTarget")]
    async fn process(&self, query: ListRatingsForTarget) -> Result<Vec<Rating>, StoreError> {
        let rows = sqlx::query_as::<_, RatingRow>(
            r#"
            SELECT id, target_kind, target_id, rater, score, comment, response, created_at
            FROM ratings
            WHERE target_kind = $1 AND target_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(query.target.kind())
        .bind(query.target.id())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Rating::try_from).collect()
    }
}
