//! Booking state machine.
//!
//! ```text
//! pending -> confirmed -> in_progress -> completed
//!    |           |             |
//!    +-----------+-------------+--> cancelled | no_show
//!    |           |
//!    +-----------+--> rescheduled   (via reschedule only)
//! ```

use chrono::NaiveDateTime;

use crate::errors::{AppError, AppResult};
use crate::models::{
    Booking, BookingStatus, Payment, Priority, StatusChange, TimeInterval, VehicleSnapshot,
};
use crate::services::pricing::Quote;

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, InProgress)
            | (InProgress, Completed)
            | (Pending | Confirmed | InProgress, Cancelled | NoShow)
            | (Pending | Confirmed, Rescheduled)
    )
}

/// Everything needed to open a booking apart from its id, number and price.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub customer_id: String,
    pub vehicle: VehicleSnapshot,
    pub resource: String,
    pub interval: TimeInterval,
    pub priority: Priority,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub rescheduled_from: Option<String>,
    pub actor: String,
}

impl Booking {
    /// A new `pending` booking with a single "created" audit entry. The booking number is
    /// assigned by the store when the booking is committed.
    pub fn open(draft: BookingDraft, quote: Quote, at: NaiveDateTime) -> Self {
        let reason = match &draft.rescheduled_from {
            Some(original) => format!("rescheduled from {original}"),
            None => "created".to_string(),
        };
        Booking {
            id: uuid::Uuid::new_v4().to_string(),
            booking_number: String::new(),
            customer_id: draft.customer_id,
            vehicle: draft.vehicle,
            line_items: quote.line_items,
            resource: draft.resource,
            interval: draft.interval,
            estimated_duration_minutes: quote.estimated_duration_minutes,
            status: BookingStatus::Pending,
            priority: draft.priority,
            pricing: quote.pricing,
            payment: Payment::default(),
            status_history: vec![StatusChange {
                previous_status: None,
                status: BookingStatus::Pending,
                changed_at: at,
                actor: draft.actor,
                reason: Some(reason),
            }],
            notes: draft.notes,
            idempotency_key: draft.idempotency_key,
            rescheduled_from: draft.rescheduled_from,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            created_at: at,
            updated_at: at,
            revision: 0,
        }
    }

    pub fn ensure_modifiable(&self) -> AppResult<()> {
        if self.status.is_modifiable() {
            Ok(())
        } else {
            Err(AppError::BookingNotModifiable {
                id: self.id.clone(),
                status: self.status,
            })
        }
    }

    /// Move to `to`, appending exactly one audit entry. Leaves the booking untouched on error.
    pub fn transition(
        &mut self,
        to: BookingStatus,
        actor: &str,
        reason: Option<String>,
        at: NaiveDateTime,
    ) -> AppResult<()> {
        if !can_transition(self.status, to) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let previous = self.status;
        match to {
            BookingStatus::Completed => self.completed_at = Some(at),
            BookingStatus::Cancelled | BookingStatus::NoShow => {
                self.cancelled_at = Some(at);
                self.cancelled_by = Some(actor.to_string());
                self.cancellation_reason = reason.clone();
            }
            _ => {}
        }

        self.status = to;
        self.updated_at = at;
        self.status_history.push(StatusChange {
            previous_status: Some(previous),
            status: to,
            changed_at: at,
            actor: actor.to_string(),
            reason,
        });
        Ok(())
    }

    /// Replace line items and totals with a fresh quote. The old pricing snapshot is dropped.
    pub fn apply_quote(&mut self, quote: Quote, at: NaiveDateTime) {
        self.line_items = quote.line_items;
        self.pricing = quote.pricing;
        self.estimated_duration_minutes = quote.estimated_duration_minutes;
        self.updated_at = at;
    }

    /// Active bookings whose payment has not been settled yet.
    pub fn awaiting_settlement(&self) -> bool {
        self.status.is_active()
            && self.payment.status != crate::models::PaymentStatus::Paid
            && self.payment.status != crate::models::PaymentStatus::Refunded
    }
}
