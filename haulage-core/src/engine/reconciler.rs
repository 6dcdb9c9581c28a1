//! Repair pass over request, payment and job drift.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Engine, PollOutcome};
use crate::clock::OpContext;
use crate::entities::{Payment, PaymentStatus, RequestStatus};
use crate::error::DispatchError;
use crate::store::JobCreation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    StatusUpdated,
    PaymentFixed,
    JobCreated,
    PaymentPolled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairDetail {
    pub request_id: Uuid,
    pub action: RepairAction,
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub status_updated: usize,
    pub payment_fixed: usize,
    pub jobs_created: usize,
    pub payments_polled: usize,
    pub errors: usize,
    pub details: Vec<RepairDetail>,
}

impl ReconcileSummary {
    /// No repairs were needed and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.status_updated == 0 && self.payment_fixed == 0 && self.jobs_created == 0 && self.errors == 0
    }

    pub fn record(&mut self, request_id: Uuid, action: RepairAction, note: impl Into<String>) {
        match action {
            RepairAction::StatusUpdated => self.status_updated += 1,
            RepairAction::PaymentFixed => self.payment_fixed += 1,
            RepairAction::JobCreated => self.jobs_created += 1,
            RepairAction::PaymentPolled => self.payments_polled += 1,
            RepairAction::Error => self.errors += 1,
        }
        self.details.push(RepairDetail {
            request_id,
            action,
            note: note.into(),
        });
    }
}

impl Engine {
    /// One reconciliation sweep over recent requests. Per-request failures
    /// are recorded and the sweep moves on; only cancellation aborts it.
    pub async fn reconcile(&self, ctx: &OpContext) -> Result<ReconcileSummary, DispatchError> {
        let window = time::Duration::days(i64::from(self.settings.reconciler.window_days));
        let since = ctx.now() - window;
        let requests = self.store.requests_for_reconciliation(since).await?;

        let mut summary = ReconcileSummary::default();
        for request in requests {
            ctx.cancel.check()?;
            summary.checked += 1;
            match self.reconcile_request(ctx, request.id, &mut summary).await {
                Ok(()) => {}
                Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Reconciliation failed for request");
                    let e = DispatchError::Reconciliation(e.to_string());
                    summary.record(request.id, RepairAction::Error, e.to_string());
                }
            }
        }

        if summary.is_clean() {
            info!(checked = summary.checked, "Reconciliation found nothing to repair");
        } else {
            info!(
                checked = summary.checked,
                status_updated = summary.status_updated,
                payment_fixed = summary.payment_fixed,
                jobs_created = summary.jobs_created,
                payments_polled = summary.payments_polled,
                errors = summary.errors,
                "Reconciliation complete"
            );
        }
        Ok(summary)
    }

    fn should_repoll(&self, ctx: &OpContext, payment: &Payment) -> bool {
        let settings = &self.settings.payments;
        let now = ctx.now();
        payment.status == PaymentStatus::Processing
            && payment.intent_id.is_some()
            && now - payment.created_at > settings.stuck_after
            && payment
                .last_polled_at
                .is_none_or(|at| now - at >= settings.poll_cooldown)
    }

    async fn reconcile_request(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        summary: &mut ReconcileSummary,
    ) -> Result<(), DispatchError> {
        let latest = self.store.latest_payment_for_request(request_id).await?;
        if let Some(payment) = latest.filter(|p| self.should_repoll(ctx, p)) {
            let outcome = self.poll_payment(ctx, payment.id).await?;
            summary.record(
                request_id,
                RepairAction::PaymentPolled,
                format!("payment {} polled", payment.reference),
            );
            if let PollOutcome::Checked(update) = outcome {
                if update.request_settled {
                    summary.record(request_id, RepairAction::StatusUpdated, "settled after poll");
                }
                if update.payment_status_fixed {
                    summary.record(request_id, RepairAction::PaymentFixed, "payment status after poll");
                }
                if let Some(job) = update.job_created {
                    summary.record(
                        request_id,
                        RepairAction::JobCreated,
                        format!("job {} created after poll", job.job_number),
                    );
                }
            }
        }

        let guard = self.request_locks.acquire(&request_id).await?;
        let mut request = self.load_request(request_id).await?;
        let latest = self.store.latest_payment_for_request(request_id).await?;

        if let Some(payment) = &latest {
            if payment.status == PaymentStatus::Completed
                && matches!(request.status, RequestStatus::Pending | RequestStatus::Bidding)
            {
                let previous = request.status;
                if self.settle_locked(ctx, &mut request, payment).await? {
                    summary.record(
                        request_id,
                        RepairAction::StatusUpdated,
                        format!("{previous} -> {}", request.status),
                    );
                }
            }
        }

        let mut created = None;
        if request.status == RequestStatus::PaymentCompleted {
            if let JobCreation::Created(job) = self.create_job_locked(ctx, &mut request).await? {
                summary.record(
                    request_id,
                    RepairAction::JobCreated,
                    format!("job {} created", job.job_number),
                );
                created = Some(JobCreation::Created(job));
            }
        }

        if self.fix_payment_status(ctx, &mut request).await? {
            summary.record(
                request_id,
                RepairAction::PaymentFixed,
                format!("payment status set to {:?}", request.payment_status),
            );
        }
        drop(guard);

        if let Some(creation) = created {
            self.after_job_creation(ctx, creation).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_by_action() {
        let mut s = ReconcileSummary::default();
        assert!(s.is_clean());
        let id = Uuid::nil();
        s.record(id, RepairAction::PaymentPolled, "polled");
        assert!(s.is_clean());
        s.record(id, RepairAction::StatusUpdated, "pending -> payment_completed");
        s.record(id, RepairAction::JobCreated, "job created");
        s.record(id, RepairAction::Error, "boom");
        assert_eq!(
            (s.payments_polled, s.status_updated, s.jobs_created, s.errors),
            (1, 1, 1, 1)
        );
        assert_eq!(s.details.len(), 4);
        assert!(!s.is_clean());

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["details"][1]["action"], "status_updated");
    }
}
