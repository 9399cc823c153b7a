use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, Customer, ServiceDefinition};
use crate::services::calendar::SlotCalendar;
use crate::services::catalog::{CatalogStore, ServiceFilter};
use crate::services::store::{BookingChange, BookingFilter, BookingStore, CustomerStore};

/// Catalog, customer and booking store over one SQLite connection.
///
/// Booking writes run in `BEGIN IMMEDIATE` transactions that take SQLite's write lock before
/// the overlap check, so the check and the write commit together even with other processes
/// sharing the database file.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = super::init_db(path)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::StorageUnavailable("database lock poisoned".to_string()))
    }

    pub fn save_service(&self, service: &ServiceDefinition) -> AppResult<()> {
        let db = self.lock()?;
        queries::save_service(&db, service)?;
        Ok(())
    }

    pub fn save_customer(&self, customer: &Customer) -> AppResult<()> {
        let db = self.lock()?;
        queries::save_customer(&db, customer)?;
        Ok(())
    }
}

fn ensure_slot_free(conn: &Connection, booking: &Booking, exclude: Option<&str>) -> AppResult<()> {
    if !booking.status.is_active() {
        return Ok(());
    }
    let date = booking.interval.date;
    let occupied = queries::get_active_bookings_on(conn, &booking.resource, &date)?;
    let calendar = SlotCalendar::from_bookings(&booking.resource, date, &occupied);

    if let Some(conflict) = calendar.find_conflict(&booking.resource, &booking.interval, exclude) {
        tracing::info!(
            resource = %booking.resource,
            date = %date,
            conflicting_booking = %conflict.booking_id,
            "slot unavailable"
        );
        return Err(AppError::SlotUnavailable {
            resource: booking.resource.clone(),
            date,
            start: booking.interval.start,
            end: booking.interval.end,
        });
    }
    Ok(())
}

fn insert_numbered(conn: &Connection, mut booking: Booking) -> AppResult<Booking> {
    booking.booking_number = queries::next_booking_number(conn, &booking.created_at.date())?;
    queries::insert_booking(conn, &booking)?;
    Ok(booking)
}

fn load_for_update(conn: &Connection, id: &str) -> AppResult<Booking> {
    queries::get_booking_by_id(conn, id)?.ok_or_else(|| AppError::BookingNotFound(id.to_string()))
}

pub(crate) fn commit_new_booking(conn: &mut Connection, booking: Booking) -> AppResult<Booking> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(key) = &booking.idempotency_key {
        if let Some(existing) = queries::get_booking_by_idempotency_key(&tx, key)? {
            tracing::info!(booking_id = %existing.id, "idempotent replay of booking create");
            return Ok(existing);
        }
    }

    ensure_slot_free(&tx, &booking, None)?;
    let booking = insert_numbered(&tx, booking)?;
    tx.commit()?;
    Ok(booking)
}

pub(crate) fn commit_change(
    conn: &mut Connection,
    id: &str,
    change: BookingChange,
) -> AppResult<Booking> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut booking = load_for_update(&tx, id)?;
    change(&mut booking)?;
    booking.revision += 1;
    ensure_slot_free(&tx, &booking, Some(id))?;
    queries::update_booking(&tx, &booking)?;

    tx.commit()?;
    Ok(booking)
}

pub(crate) fn commit_replacement(
    conn: &mut Connection,
    id: &str,
    change: BookingChange,
    replacement: Booking,
) -> AppResult<(Booking, Booking)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut original = load_for_update(&tx, id)?;
    change(&mut original)?;
    original.revision += 1;
    ensure_slot_free(&tx, &original, Some(id))?;
    queries::update_booking(&tx, &original)?;

    ensure_slot_free(&tx, &replacement, Some(id))?;
    let replacement = insert_numbered(&tx, replacement)?;

    tx.commit()?;
    Ok((original, replacement))
}

#[async_trait]
impl BookingStore for SqliteStore {
    async fn get_booking(&self, id: &str) -> AppResult<Option<Booking>> {
        let db = self.lock()?;
        Ok(queries::get_booking_by_id(&db, id)?)
    }

    async fn insert_booking(&self, booking: Booking) -> AppResult<Booking> {
        let mut db = self.lock()?;
        commit_new_booking(&mut db, booking)
    }

    async fn modify_booking(&self, id: &str, change: BookingChange) -> AppResult<Booking> {
        let mut db = self.lock()?;
        commit_change(&mut db, id, change)
    }

    async fn replace_booking(
        &self,
        id: &str,
        change: BookingChange,
        replacement: Booking,
    ) -> AppResult<(Booking, Booking)> {
        let mut db = self.lock()?;
        commit_replacement(&mut db, id, change, replacement)
    }

    async fn active_bookings_on(&self, resource: &str, date: NaiveDate) -> AppResult<Vec<Booking>> {
        let db = self.lock()?;
        Ok(queries::get_active_bookings_on(&db, resource, &date)?)
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> AppResult<Vec<Booking>> {
        let db = self.lock()?;
        Ok(queries::list_bookings(&db, filter)?)
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn find_service_by_id(&self, id: &str) -> AppResult<Option<ServiceDefinition>> {
        let db = self.lock()?;
        Ok(queries::get_service(&db, id)?)
    }

    async fn list_active_services(&self, filter: &ServiceFilter) -> AppResult<Vec<ServiceDefinition>> {
        let db = self.lock()?;
        Ok(queries::list_active_services(&db, filter.category.as_deref())?)
    }
}

#[async_trait]
impl CustomerStore for SqliteStore {
    async fn find_customer_by_id(&self, id: &str) -> AppResult<Option<Customer>> {
        let db = self.lock()?;
        Ok(queries::get_customer(&db, id)?)
    }
}
