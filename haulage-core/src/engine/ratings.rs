use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::Engine;
use crate::clock::OpContext;
use crate::entities::{JobStatus, Rating, RatingTarget, TimelineEvent, TimelineEventType};
use crate::error::{DispatchError, StoreError};
use crate::store::MetricsUpdate;

impl Engine {
    /// Record a rating. Job ratings come from the request owner once the
    /// job is completed; both job and provider ratings feed the provider's
    /// rolling average.
    pub async fn rate(
        &self,
        ctx: &OpContext,
        target: RatingTarget,
        rater: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Rating, DispatchError> {
        if !(1..=5).contains(&score) {
            return Err(DispatchError::invalid("score must be between 1 and 5"));
        }
        let now = ctx.now();
        let (provider_id, job) = match target {
            RatingTarget::Job(job_id) => {
                let job = self.load_job(job_id).await?;
                if job.status != JobStatus::Completed {
                    return Err(DispatchError::invalid("only completed jobs can be rated"));
                }
                let request = self.load_request(job.request_id).await?;
                if request.user_id != rater {
                    return Err(DispatchError::invalid("only the customer can rate this job"));
                }
                (job.assigned_provider, Some(job))
            }
            RatingTarget::Provider(provider_id) => {
                self.load_provider(provider_id).await?;
                (Some(provider_id), None)
            }
            RatingTarget::Service(_) => (None, None),
        };

        let rating = Rating {
            id: Uuid::now_v7(),
            target,
            rater,
            score,
            comment,
            response: None,
            created_at: now,
        };
        match self.store.insert_rating(&rating).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(DispatchError::invalid("already rated"));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(provider_id) = provider_id {
            self.fold_metrics(provider_id, MetricsUpdate::Rating(score)).await;
        }
        if let Some(job) = job {
            self.store
                .append_timeline(&TimelineEvent::new(
                    job.id,
                    TimelineEventType::Rated,
                    format!("Rated {score}/5"),
                    json!({ "rating_id": rating.id, "score": score }),
                    now,
                    ctx.actor,
                ))
                .await?;
        }
        info!(target = target.kind(), target_id = %target.id(), score, "Rating recorded");
        Ok(rating)
    }

    pub async fn ratings_for(&self, target: RatingTarget) -> Result<Vec<Rating>, DispatchError> {
        Ok(self.store.ratings_for(target).await?)
    }
}
