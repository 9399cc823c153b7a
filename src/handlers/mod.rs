pub mod bookings;
pub mod health;
pub mod payments;
pub mod services;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/services", get(services::list_services))
        .route(
            "/api/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route(
            "/api/bookings/available-slots",
            get(bookings::available_slots),
        )
        .route("/api/bookings/dashboard", get(bookings::dashboard))
        .route(
            "/api/bookings/:id",
            get(bookings::get_booking).put(bookings::update_booking),
        )
        .route(
            "/api/bookings/:id/status",
            axum::routing::patch(bookings::update_status),
        )
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route(
            "/api/bookings/:id/reschedule",
            post(bookings::reschedule_booking),
        )
        .route("/api/payments/webhook", post(payments::payment_webhook))
        .route(
            "/api/payments/:booking_id",
            get(payments::payment_status).post(payments::start_payment),
        )
        .route(
            "/api/payments/:booking_id/refund",
            post(payments::refund_payment),
        )
        .with_state(state)
}
