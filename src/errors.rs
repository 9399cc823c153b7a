use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, NaiveTime};

use crate::models::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("customer not found: {0}")]
    CustomerNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("booking not found: {0}")]
    BookingNotFound(String),

    #[error("service {service_id} is not available for vehicle type {vehicle_type}")]
    ServiceIneligible {
        service_id: String,
        vehicle_type: String,
    },

    #[error("slot {date} {}-{} on {resource} is already booked", .start.format("%H:%M"), .end.format("%H:%M"))]
    SlotUnavailable {
        resource: String,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("booking {id} cannot be modified while {status}")]
    BookingNotModifiable { id: String, status: BookingStatus },

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("booking {0} was changed by another request")]
    BookingChanged(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("payment error: {0}")]
    Payment(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CustomerNotFound(_) => "customer_not_found",
            AppError::ServiceNotFound(_) => "service_not_found",
            AppError::BookingNotFound(_) => "booking_not_found",
            AppError::ServiceIneligible { .. } => "service_ineligible",
            AppError::SlotUnavailable { .. } => "slot_unavailable",
            AppError::BookingNotModifiable { .. } => "booking_not_modifiable",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::BookingChanged(_) => "booking_changed",
            AppError::InvalidInterval(_) => "invalid_interval",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Payment(_) => "payment_error",
            AppError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::StorageUnavailable(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::StorageUnavailable(format!("{e:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::CustomerNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BookingNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceIneligible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SlotUnavailable { .. } => StatusCode::CONFLICT,
            AppError::BookingNotModifiable { .. } => StatusCode::CONFLICT,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::BookingChanged(_) => StatusCode::CONFLICT,
            AppError::InvalidInterval(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Payment(_) => StatusCode::BAD_GATEWAY,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "kind": self.kind() });
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
