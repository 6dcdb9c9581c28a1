//! Payment intents, inbound status updates, polling and refunds.
//!
//! Oracle statuses only move a payment along its transition graph; anything
//! else is logged as out-of-order and ignored. Backoff polling of a stuck
//! payment runs without the request lock.

use haulage_sdk::objects::PaymentWebhookPayload;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Engine, rfc3339};
use crate::clock::OpContext;
use crate::entities::{
    Job, Payment, PaymentStatus, PaymentType, Request, RequestPaymentStatus, RequestStatus,
};
use crate::error::DispatchError;
use crate::events::DomainEvent;
use crate::oracles::{PollUntil, VerifiedPayment};
use crate::store::JobCreation;

/// What applying an oracle status changed.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub payment: Payment,
    pub payment_changed: bool,
    /// The request moved to `payment_completed`.
    pub request_settled: bool,
    /// The request's payment status was brought in line with the payment.
    pub payment_status_fixed: bool,
    pub job_created: Option<Job>,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Checked(PaymentUpdate),
    /// Backoff polling gave up; the payment stays in `processing`.
    Exhausted(Payment),
}

impl Engine {
    /// Open a payment with the processor for a submitted request. `amount`
    /// defaults to the request's base price.
    pub async fn initialize_payment(
        &self,
        ctx: &OpContext,
        request_id: Uuid,
        payment_type: PaymentType,
        amount: Option<Decimal>,
    ) -> Result<Payment, DispatchError> {
        let _guard = self.request_locks.acquire(&request_id).await?;
        let request = self.load_request(request_id).await?;
        let payable = match request.status {
            RequestStatus::Pending | RequestStatus::Bidding => true,
            // assigned directly before it was paid for
            RequestStatus::Accepted | RequestStatus::Assigned | RequestStatus::InTransit => {
                request.payment_status != RequestPaymentStatus::Completed
            }
            _ => false,
        };
        if !payable {
            return Err(DispatchError::InvalidTransition {
                entity: "request",
                from: request.status.to_string(),
                action: "take payment",
            });
        }
        let amount = amount
            .or(request.base_price)
            .ok_or_else(|| DispatchError::invalid("request has no price to charge"))?;
        if amount <= Decimal::ZERO {
            return Err(DispatchError::invalid("payment amount must be positive"));
        }

        let now = ctx.now();
        let id = Uuid::now_v7();
        let currency = self.settings.payments.currency.clone();
        let metadata = json!({
            "request_id": request_id,
            "tracking_number": request.tracking_number.as_str(),
            "payment_type": payment_type,
        });
        let mut payment = Payment {
            id,
            request_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            payment_type,
            reference: format!("{}-{}", request.tracking_number, id.simple()),
            intent_id: None,
            charge_id: None,
            authorization_url: None,
            refunded_amount: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_polled_at: None,
            metadata: metadata.clone(),
        };
        self.store.insert_payment(&payment).await?;

        let intent = self
            .payments
            .initialize(amount, &payment.currency, &payment.reference, metadata)
            .await
            .map_err(DispatchError::PaymentUnavailable)?;
        payment.intent_id = Some(intent.intent_id);
        payment.authorization_url = intent.authorization_url;
        payment.updated_at = ctx.now();
        self.store.save_payment(&payment).await?;
        info!(
            payment_id = %payment.id,
            %request_id,
            amount = %amount,
            reference = %payment.reference,
            "Payment initialized"
        );
        Ok(payment)
    }

    /// Apply an oracle status to a payment and bring its request in line.
    /// The caller holds the request lock.
    async fn apply_verified_locked(
        &self,
        ctx: &OpContext,
        request: &mut Request,
        mut payment: Payment,
        verified: VerifiedPayment,
    ) -> Result<PaymentUpdate, DispatchError> {
        let now = ctx.now();
        let previous = payment.status;
        let target = verified.status.payment_status();
        let mut changed = false;

        if target != previous {
            if previous.can_transition_to(target) {
                payment.status = target;
                if target == PaymentStatus::Completed {
                    payment.completed_at = Some(now);
                }
                changed = true;
            } else {
                warn!(
                    payment_id = %payment.id,
                    from = %previous,
                    to = %target,
                    "Ignoring out-of-order payment status"
                );
            }
        }
        if verified.charge_id.is_some() && verified.charge_id != payment.charge_id {
            payment.charge_id = verified.charge_id;
            changed = true;
        }
        if verified.metadata.as_object().is_some_and(|m| !m.is_empty()) {
            if !payment.metadata.is_object() {
                payment.metadata = json!({});
            }
            if let Some(meta) = payment.metadata.as_object_mut() {
                if meta.get("processor") != Some(&verified.metadata) {
                    meta.insert("processor".to_string(), verified.metadata);
                    changed = true;
                }
            }
        }

        if changed {
            payment.updated_at = now;
            self.store.save_payment(&payment).await?;
        }
        if payment.status != previous {
            info!(payment_id = %payment.id, from = %previous, to = %payment.status, "Payment status changed");
            self.bus.publish(DomainEvent::PaymentStatusChanged {
                payment_id: payment.id,
                request_id: payment.request_id,
                previous,
                new: payment.status,
            });
        }

        let mut update = PaymentUpdate {
            payment,
            payment_changed: changed,
            request_settled: false,
            payment_status_fixed: false,
            job_created: None,
        };
        self.sync_request(ctx, request, &mut update).await?;
        Ok(update)
    }

    async fn sync_request(
        &self,
        ctx: &OpContext,
        request: &mut Request,
        update: &mut PaymentUpdate,
    ) -> Result<(), DispatchError> {
        if update.payment.status == PaymentStatus::Completed {
            update.request_settled = self.settle_locked(ctx, request, &update.payment).await?;
        }
        update.payment_status_fixed = self.fix_payment_status(ctx, request).await?;
        if request.status == RequestStatus::PaymentCompleted {
            match self.create_job_locked(ctx, request).await {
                Ok(JobCreation::Created(job)) => update.job_created = Some(job),
                Ok(JobCreation::Existing(_)) => {}
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Job creation deferred to reconciliation");
                }
            }
        }
        Ok(())
    }

    /// Set the request's payment status from its latest payment. Returns
    /// whether it changed. The caller holds the request lock.
    pub(super) async fn fix_payment_status(
        &self,
        ctx: &OpContext,
        request: &mut Request,
    ) -> Result<bool, DispatchError> {
        let Some(latest) = self.store.latest_payment_for_request(request.id).await? else {
            return Ok(false);
        };
        let expected = latest.status.request_payment_status();
        if request.payment_status == expected {
            return Ok(false);
        }
        info!(
            request_id = %request.id,
            from = ?request.payment_status,
            to = ?expected,
            "Request payment status repaired"
        );
        request.payment_status = expected;
        request.updated_at = ctx.now();
        self.store.save_request(request).await?;
        Ok(true)
    }

    async fn dispatch_created(&self, ctx: &OpContext, update: &PaymentUpdate) {
        if let Some(job) = &update.job_created {
            self.after_job_creation(ctx, JobCreation::Created(job.clone()))
                .await;
        }
    }

    /// Apply a verified processor status to `payment_id`.
    pub async fn apply_payment_status(
        &self,
        ctx: &OpContext,
        payment_id: Uuid,
        verified: VerifiedPayment,
    ) -> Result<PaymentUpdate, DispatchError> {
        let request_id = self.load_payment(payment_id).await?.request_id;
        let guard = self.request_locks.acquire(&request_id).await?;
        let payment = self.load_payment(payment_id).await?;
        let mut request = self.load_request(request_id).await?;
        let update = self
            .apply_verified_locked(ctx, &mut request, payment, verified)
            .await?;
        drop(guard);
        self.dispatch_created(ctx, &update).await;
        Ok(update)
    }

    /// Inbound processor callback. The signature has already been checked.
    pub async fn handle_payment_webhook(
        &self,
        ctx: &OpContext,
        payload: PaymentWebhookPayload,
    ) -> Result<PaymentUpdate, DispatchError> {
        let payment = self
            .store
            .payment_by_intent(&payload.intent_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", &payload.intent_id))?;
        if let Some(amount) = payload.amount {
            if amount != payment.amount {
                warn!(
                    payment_id = %payment.id,
                    expected = %payment.amount,
                    reported = %amount,
                    "Webhook amount does not match payment"
                );
            }
        }
        let verified = VerifiedPayment {
            status: payload.status.into(),
            charge_id: payload.charge_id,
            metadata: payload.metadata,
        };
        self.apply_payment_status(ctx, payment.id, verified).await
    }

    /// Ask the processor for the current status. A payment stuck in
    /// `processing` is polled with backoff; on exhaustion it stays there and
    /// an alert is raised.
    pub async fn poll_payment(
        &self,
        ctx: &OpContext,
        payment_id: Uuid,
    ) -> Result<PollOutcome, DispatchError> {
        let payment = self.load_payment(payment_id).await?;
        let Some(intent_id) = payment.intent_id.clone() else {
            return Err(DispatchError::invalid("payment has no processor intent"));
        };
        let settings = &self.settings.payments;
        let stuck = payment.status == PaymentStatus::Processing
            && ctx.now() - payment.created_at > settings.stuck_after;

        let verified = if stuck {
            let polled = self
                .payments
                .poll_until(
                    &intent_id,
                    settings.poll_max_attempts,
                    settings.poll_base_delay,
                    &ctx.cancel,
                )
                .await;
            match polled {
                PollUntil::Terminal(verified) => verified,
                PollUntil::Cancelled => return Err(DispatchError::Cancelled),
                PollUntil::Exhausted {
                    last_status,
                    last_error,
                } => {
                    self.alert(
                        format!("Payment {} stuck in processing", payment.reference),
                        format!(
                            "gave up after {} attempts; last status {:?}, last error {}",
                            settings.poll_max_attempts,
                            last_status,
                            last_error.as_deref().unwrap_or("none"),
                        ),
                        None,
                    );
                    let _guard = self.request_locks.acquire(&payment.request_id).await?;
                    let mut payment = self.load_payment(payment_id).await?;
                    payment.last_polled_at = Some(ctx.now());
                    self.store.save_payment(&payment).await?;
                    return Ok(PollOutcome::Exhausted(payment));
                }
            }
        } else {
            self.payments
                .verify(&intent_id)
                .await
                .map_err(DispatchError::PaymentUnavailable)?
        };

        let guard = self.request_locks.acquire(&payment.request_id).await?;
        let mut payment = self.load_payment(payment_id).await?;
        payment.last_polled_at = Some(ctx.now());
        self.store.save_payment(&payment).await?;
        let mut request = self.load_request(payment.request_id).await?;
        let update = self
            .apply_verified_locked(ctx, &mut request, payment, verified)
            .await?;
        drop(guard);
        self.dispatch_created(ctx, &update).await;
        Ok(PollOutcome::Checked(update))
    }

    /// Refund all or part of a completed payment.
    pub async fn refund(
        &self,
        ctx: &OpContext,
        payment_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<Payment, DispatchError> {
        let request_id = self.load_payment(payment_id).await?.request_id;
        let _guard = self.request_locks.acquire(&request_id).await?;
        let mut payment = self.load_payment(payment_id).await?;
        if !matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return Err(DispatchError::InvalidTransition {
                entity: "payment",
                from: payment.status.to_string(),
                action: "refund",
            });
        }
        let refundable = payment.amount - payment.refunded_amount;
        let amount = amount.unwrap_or(refundable);
        if amount <= Decimal::ZERO || amount > refundable {
            return Err(DispatchError::invalid(format!(
                "refund amount must be between 0 and {refundable}"
            )));
        }
        let intent_id = payment
            .intent_id
            .clone()
            .ok_or_else(|| DispatchError::invalid("payment has no processor intent"))?;
        let partial_amount = (amount != payment.amount).then_some(amount);
        let receipt = self
            .payments
            .refund(&intent_id, partial_amount)
            .await
            .map_err(DispatchError::PaymentUnavailable)?;

        let now = ctx.now();
        let previous = payment.status;
        payment.refunded_amount += amount;
        payment.status = if payment.refunded_amount >= payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.updated_at = now;
        if !payment.metadata.is_object() {
            payment.metadata = json!({});
        }
        if let Some(meta) = payment.metadata.as_object_mut() {
            let refunds = meta.entry("refunds").or_insert_with(|| json!([]));
            if let Some(list) = refunds.as_array_mut() {
                list.push(json!({
                    "refund_id": receipt.refund_id,
                    "amount": amount.to_string(),
                    "at": rfc3339(now),
                }));
            }
        }
        self.store.save_payment(&payment).await?;
        info!(%payment_id, amount = %amount, status = %payment.status, "Payment refunded");
        if payment.status != previous {
            self.bus.publish(DomainEvent::PaymentStatusChanged {
                payment_id,
                request_id,
                previous,
                new: payment.status,
            });
        }

        let mut request = self.load_request(request_id).await?;
        if request.payment_status != RequestPaymentStatus::Refunded {
            self.fix_payment_status(ctx, &mut request).await?;
        }
        Ok(payment)
    }

    async fn load_payment(&self, id: Uuid) -> Result<Payment, DispatchError> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", id))
    }
}
