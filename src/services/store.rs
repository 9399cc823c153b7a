use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::AppResult;
use crate::models::{Booking, BookingStatus, Customer, PaymentStatus};

/// A mutation applied to a booking inside the store's commit. Returning an error aborts the
/// commit and leaves the stored booking unchanged.
pub type BookingChange = Box<dyn FnOnce(&mut Booking) -> AppResult<()> + Send>;

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub customer_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub payment_status: Option<PaymentStatus>,
    pub plate_number: Option<String>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_customer_by_id(&self, id: &str) -> AppResult<Option<Customer>>;
}

/// Durable booking records.
///
/// Every write that can leave a booking active must be an atomic conditional commit: the
/// overlap check against the other active bookings of the same resource and day and the write
/// itself happen as one step, so two concurrent callers can never both claim the same time.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_booking(&self, id: &str) -> AppResult<Option<Booking>>;

    /// Insert `booking` unless it overlaps an active booking (`SlotUnavailable`). Assigns the
    /// booking number. When the idempotency key is already known, returns the stored booking.
    async fn insert_booking(&self, booking: Booking) -> AppResult<Booking>;

    /// Load, apply `change`, re-check overlap (ignoring the booking itself) and save. The stored
    /// revision is incremented on success.
    async fn modify_booking(&self, id: &str, change: BookingChange) -> AppResult<Booking>;

    /// Apply `change` to the booking `id` and insert `replacement` in the same commit.
    /// Returns `(original, replacement)`.
    async fn replace_booking(
        &self,
        id: &str,
        change: BookingChange,
        replacement: Booking,
    ) -> AppResult<(Booking, Booking)>;

    async fn active_bookings_on(&self, resource: &str, date: NaiveDate) -> AppResult<Vec<Booking>>;

    async fn list_bookings(&self, filter: &BookingFilter) -> AppResult<Vec<Booking>>;
}
