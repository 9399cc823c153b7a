use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, PaymentStatus, TimeInterval};
use crate::services::scheduling::{
    CreateBookingRequest, DashboardSummary, LineRequest, RescheduleRequest, Rescheduled,
    UpdateBookingRequest,
};
use crate::services::store::BookingFilter;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const DEFAULT_DASHBOARD_DAYS: i64 = 30;

// GET /api/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub payment_status: Option<PaymentStatus>,
    pub plate_number: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> AppResult<Json<Vec<Booking>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            BookingStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };

    let filter = BookingFilter {
        status,
        customer_id: query.customer_id,
        from: query.from,
        to: query.to,
        payment_status: query.payment_status,
        plate_number: query.plate_number.filter(|p| !p.trim().is_empty()),
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    Ok(Json(state.scheduler.list_bookings(&filter).await?))
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let booking = state.scheduler.create_booking(req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.scheduler.get_booking(&id).await?))
}

// PUT /api/bookings/:id
pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBookingRequest>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.scheduler.update_booking(&id, req).await?))
}

// PATCH /api/bookings/:id/status
#[derive(Deserialize)]
pub struct StatusBody {
    pub status: BookingStatus,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> AppResult<Json<Booking>> {
    let actor = body.actor.unwrap_or_else(|| "staff".to_string());
    let booking = state
        .scheduler
        .transition_status(&id, body.status, &actor, body.reason)
        .await?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/cancel
#[derive(Deserialize, Default)]
pub struct CancelBody {
    pub actor: Option<String>,
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> AppResult<Json<Booking>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = body.actor.unwrap_or_else(|| "customer".to_string());
    Ok(Json(
        state
            .scheduler
            .cancel_booking(&id, &actor, body.reason)
            .await?,
    ))
}

// POST /api/bookings/:id/reschedule
#[derive(Deserialize)]
pub struct RescheduleBody {
    #[serde(flatten)]
    pub request: RescheduleRequest,
    pub actor: Option<String>,
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RescheduleBody>,
) -> AppResult<Json<Rescheduled>> {
    let actor = body.actor.unwrap_or_else(|| "customer".to_string());
    Ok(Json(
        state
            .scheduler
            .reschedule_booking(&id, body.request, &actor)
            .await?,
    ))
}

// GET /api/bookings/available-slots
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub resource: Option<String>,
    pub duration: Option<u32>,
    /// Comma-separated service ids, used when `duration` is absent.
    pub services: Option<String>,
}

#[derive(Serialize)]
pub struct SlotsResponse {
    pub resource: String,
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub business_hours: String,
    pub slots: Vec<TimeInterval>,
}

pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> AppResult<Json<SlotsResponse>> {
    let duration = match (query.duration, query.services.as_deref()) {
        (Some(minutes), _) => minutes,
        (None, Some(ids)) => {
            let lines: Vec<LineRequest> = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| LineRequest {
                    service_id: id.to_string(),
                    quantity: 1,
                })
                .collect();
            if lines.is_empty() {
                return Err(AppError::InvalidRequest("no services given".to_string()));
            }
            state.scheduler.duration_for(&lines).await?
        }
        (None, None) => {
            return Err(AppError::InvalidRequest(
                "either duration or services is required".to_string(),
            ))
        }
    };

    let config = state.scheduler.config();
    let resource = query
        .resource
        .unwrap_or_else(|| config.default_resource.clone());
    let slots = state
        .scheduler
        .get_availability(Some(resource.as_str()), query.date, duration)
        .await?;

    Ok(Json(SlotsResponse {
        resource,
        date: query.date,
        duration_minutes: duration,
        business_hours: config.business_hours.to_human_readable(),
        slots,
    }))
}

// GET /api/bookings/dashboard
#[derive(Deserialize)]
pub struct DashboardQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
) -> AppResult<Json<DashboardSummary>> {
    let to = query
        .to
        .unwrap_or_else(|| chrono::Utc::now().date_naive());
    let from = query
        .from
        .unwrap_or(to - Duration::days(DEFAULT_DASHBOARD_DAYS));
    Ok(Json(state.scheduler.dashboard_summary(from, to).await?))
}
