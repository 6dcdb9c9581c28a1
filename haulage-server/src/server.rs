//! Axum server setup and router configuration.
//!
//! The HTTP surface is intentionally small: a health probe and the inbound
//! payment processor webhook.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use haulage_core::clock::OpContext;
use haulage_core::entities::PaymentStatus;
use haulage_core::error::{DispatchError, Surface};
use haulage_sdk::objects::PaymentWebhookPayload;
use haulage_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct WebhookAck {
    payment_id: Uuid,
    status: PaymentStatus,
    changed: bool,
    request_settled: bool,
    job_id: Option<Uuid>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Errors returned from the webhook route.
enum WebhookError {
    Disabled,
    MissingSignature,
    Malformed(String),
    BadSignature,
    Engine(DispatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebhookError::Disabled => (StatusCode::NOT_FOUND, "webhooks disabled".to_string()),
            WebhookError::MissingSignature => (
                StatusCode::UNAUTHORIZED,
                format!("missing {SIGNATURE_HEADER} header"),
            ),
            WebhookError::Malformed(e) => (StatusCode::BAD_REQUEST, e),
            WebhookError::BadSignature => {
                (StatusCode::UNAUTHORIZED, "invalid signature".to_string())
            }
            WebhookError::Engine(e) => {
                let status = status_for(e.surface());
                if status.is_server_error() {
                    tracing::error!(error = %e, "Payment webhook processing failed");
                    (status, "internal error".to_string())
                } else {
                    (status, e.to_string())
                }
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn status_for(surface: Surface) -> StatusCode {
    match surface {
        Surface::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
        Surface::RetryLater => StatusCode::SERVICE_UNAVAILABLE,
        Surface::NoLongerAvailable => StatusCode::CONFLICT,
        Surface::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Signed status push from the payment processor.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, WebhookError> {
    let secret = state.webhook_secret().ok_or(WebhookError::Disabled)?;
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    let signed = SignedObject::<PaymentWebhookPayload>::from_header_and_body(header, body)
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;
    let payload = signed.verify(secret.as_bytes()).map_err(|e| {
        tracing::warn!(error = %e, "Rejected payment webhook signature");
        WebhookError::BadSignature
    })?;

    let ctx = OpContext::system(state.clock.clone());
    let update = state
        .engine
        .handle_payment_webhook(&ctx, payload)
        .await
        .map_err(WebhookError::Engine)?;

    Ok(Json(WebhookAck {
        payment_id: update.payment.id,
        status: update.payment.status,
        changed: update.payment_changed,
        request_settled: update.request_settled,
        job_id: update.job_created.map(|job| job.id),
    }))
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
