//! HTTP routes for the relay webhook.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{panic_reason, Relay, RelayError};
use crate::payload::InboundPayload;

const SERVICE: &str = "relay-webhook";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversations: Option<usize>,
    /// Senders with a request in progress
    #[serde(skip_serializing_if = "Option::is_none")]
    in_flight: Option<usize>,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn error_response(status: StatusCode, error: &str, details: Option<serde_json::Value>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details,
        }),
    )
        .into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            Self::Payload(e) => {
                let status =
                    StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
                error_response(
                    status,
                    "Invalid payload",
                    Some(serde_json::json!([e.to_string()])),
                )
            }
            Self::Validation(violations) => error_response(
                StatusCode::BAD_REQUEST,
                "Invalid webhook payload",
                serde_json::to_value(violations).ok(),
            ),
            Self::Delivery { source, apology } => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to deliver reply",
                Some(serde_json::json!({
                    "provider": source.provider(),
                    "reason": source.to_string(),
                    "apology_sent": apology.is_delivered(),
                })),
            ),
            Self::Unexpected { reason, apology } => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(serde_json::json!({
                    "reason": reason,
                    "apology_sent": apology.is_delivered(),
                })),
            ),
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let reason = panic_reason(&*panic);
    tracing::error!(reason = %reason, "Webhook handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
        conversations: None,
        in_flight: None,
    })
}

async fn ready(State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ready",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
        conversations: Some(relay.store().len()),
        in_flight: Some(relay.store().active_leases()),
    })
}

// ============================================================================
// WhatsApp Webhook
// ============================================================================

/// POST /webhook: inbound message from the gateway (form or JSON).
async fn whatsapp_webhook(
    State(relay): State<Arc<Relay>>,
    payload: InboundPayload,
) -> Result<Json<WebhookResponse>, RelayError> {
    relay.handle_payload(payload).await?;
    Ok(Json(WebhookResponse {
        success: true,
        message: Some("Reply sent".to_string()),
    }))
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the relay HTTP router.
pub fn build_router(relay: Arc<Relay>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/webhook", post(whatsapp_webhook))
        .with_state(relay)
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}
