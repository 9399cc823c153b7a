use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::models::{Booking, PaymentMethod};
use crate::services::payments::{verify_webhook_signature, GatewayPayment, GatewayStatus, PaymentEvent};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

// POST /api/payments/:booking_id
#[derive(Deserialize)]
pub struct StartPaymentBody {
    pub method: PaymentMethod,
}

pub async fn start_payment(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    Json(body): Json<StartPaymentBody>,
) -> AppResult<Json<Booking>> {
    Ok(Json(
        state
            .payments
            .start_payment(&booking_id, body.method)
            .await?,
    ))
}

// GET /api/payments/:booking_id
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
) -> AppResult<Json<GatewayPayment>> {
    Ok(Json(state.payments.verify_payment(&booking_id).await?))
}

// POST /api/payments/:booking_id/refund
#[derive(Deserialize)]
pub struct RefundBody {
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    Json(body): Json<RefundBody>,
) -> AppResult<Json<Booking>> {
    Ok(Json(
        state
            .payments
            .refund_payment(&booking_id, body.amount, body.reason)
            .await?,
    ))
}

// POST /api/payments/webhook
#[derive(Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Deserialize)]
pub struct WebhookData {
    pub id: String,
    pub amount: Option<i64>,
    #[serde(default)]
    pub metadata: WebhookMetadata,
}

#[derive(Deserialize, Default)]
pub struct WebhookMetadata {
    pub booking_id: Option<String>,
}

pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = &state.config.payment_webhook_secret;
    // Empty secret disables signature checks (local development)
    if !secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_webhook_signature(secret, &body, signature) {
            tracing::warn!("invalid payment webhook signature");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed payment webhook");
            return Json(serde_json::json!({ "received": true, "applied": false })).into_response();
        }
    };

    let status = match payload.event_type.as_str() {
        "payment_paid" => GatewayStatus::Paid,
        "payment_failed" => GatewayStatus::Failed,
        other => {
            tracing::info!(event_type = other, "ignoring payment webhook");
            return Json(serde_json::json!({ "received": true, "applied": false })).into_response();
        }
    };
    let Some(booking_id) = payload.data.metadata.booking_id else {
        tracing::warn!(payment_id = %payload.data.id, "payment webhook without booking id");
        return Json(serde_json::json!({ "received": true, "applied": false })).into_response();
    };

    let event = PaymentEvent {
        booking_id,
        payment_id: payload.data.id,
        status,
        amount_minor: payload.data.amount,
    };
    match state.payments.apply_payment_event(event).await {
        Ok(_) => Json(serde_json::json!({ "received": true, "applied": true })).into_response(),
        Err(AppError::BookingNotFound(what)) => {
            tracing::warn!(booking = %what, "payment webhook matched no booking");
            Json(serde_json::json!({ "received": true, "applied": false })).into_response()
        }
        Err(e) => e.into_response(),
    }
}
