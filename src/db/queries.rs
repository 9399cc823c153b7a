use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{Booking, Customer, ServiceDefinition};
use crate::services::store::BookingFilter;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

const ACTIVE_STATUSES_SQL: &str = "('pending', 'confirmed', 'in_progress')";

fn ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn day(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

// ── Customers ──

pub fn save_customer(conn: &Connection, customer: &Customer) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customers (id, name, phone, email) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           phone = excluded.phone,
           email = excluded.email",
        params![customer.id, customer.name, customer.phone, customer.email],
    )?;
    Ok(())
}

pub fn get_customer(conn: &Connection, id: &str) -> anyhow::Result<Option<Customer>> {
    let customer = conn
        .query_row(
            "SELECT id, name, phone, email FROM customers WHERE id = ?1",
            params![id],
            |row| {
                Ok(Customer {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    email: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(customer)
}

// ── Services ──

pub fn save_service(conn: &Connection, service: &ServiceDefinition) -> anyhow::Result<()> {
    service.validate()?;
    let data = serde_json::to_string(service)?;
    conn.execute(
        "INSERT INTO services (id, category, active, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           category = excluded.category,
           active = excluded.active,
           data = excluded.data,
           updated_at = datetime('now')",
        params![service.id, service.category, service.active as i32, data],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<ServiceDefinition>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM services WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(json) => Ok(Some(
            serde_json::from_str(&json).with_context(|| format!("corrupt service record {id}"))?,
        )),
        None => Ok(None),
    }
}

pub fn list_active_services(
    conn: &Connection,
    category: Option<&str>,
) -> anyhow::Result<Vec<ServiceDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT data FROM services
         WHERE active = 1 AND (?1 IS NULL OR category = ?1)
         ORDER BY category ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![category], |row| row.get::<_, String>(0))?;

    let mut services = vec![];
    for row in rows {
        services.push(serde_json::from_str(&row?).context("corrupt service record")?);
    }
    Ok(services)
}

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    let data = serde_json::to_string(booking)?;
    conn.execute(
        "INSERT INTO bookings (id, booking_number, customer_id, plate_number, resource, scheduled_date,
                               start_time, end_time, status, payment_status, transaction_id,
                               idempotency_key, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            booking.id,
            booking.booking_number,
            booking.customer_id,
            booking.vehicle.plate_number,
            booking.resource,
            day(&booking.interval.date),
            booking.interval.start.format(TIME_FORMAT).to_string(),
            booking.interval.end.format(TIME_FORMAT).to_string(),
            booking.status.as_str(),
            booking.payment.status.as_str(),
            booking.payment.transaction_id,
            booking.idempotency_key,
            data,
            ts(&booking.created_at),
            ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let data = serde_json::to_string(booking)?;
    let count = conn.execute(
        "UPDATE bookings SET
           resource = ?2, scheduled_date = ?3, start_time = ?4, end_time = ?5, status = ?6,
           payment_status = ?7, transaction_id = ?8, data = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            booking.id,
            booking.resource,
            day(&booking.interval.date),
            booking.interval.start.format(TIME_FORMAT).to_string(),
            booking.interval.end.format(TIME_FORMAT).to_string(),
            booking.status.as_str(),
            booking.payment.status.as_str(),
            booking.payment.transaction_id,
            data,
            ts(&booking.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM bookings WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|json| parse_booking(&json)).transpose()
}

pub fn get_booking_by_idempotency_key(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<Booking>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM bookings WHERE idempotency_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|json| parse_booking(&json)).transpose()
}

/// Bookings occupying `resource` on `date`, ordered by start time.
pub fn get_active_bookings_on(
    conn: &Connection,
    resource: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT data FROM bookings
         WHERE resource = ?1 AND scheduled_date = ?2 AND status IN {ACTIVE_STATUSES_SQL}
         ORDER BY start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![resource, day(date)], |row| row.get::<_, String>(0))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(parse_booking(&row?)?);
    }
    Ok(bookings)
}

/// Next free `BK<yyyymmdd><seq>` number for bookings created on `date`.
pub fn next_booking_number(conn: &Connection, date: &NaiveDate) -> anyhow::Result<String> {
    let prefix = format!("BK{}", date.format("%Y%m%d"));
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE booking_number LIKE ?1 || '%'",
        params![prefix],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:04}", count + 1))
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> anyhow::Result<Vec<Booking>> {
    let mut clauses: Vec<&str> = vec![];
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![];

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status.as_str()));
    }
    if let Some(customer_id) = &filter.customer_id {
        clauses.push("customer_id = ?");
        values.push(Box::new(customer_id.clone()));
    }
    if let Some(from) = &filter.from {
        clauses.push("scheduled_date >= ?");
        values.push(Box::new(day(from)));
    }
    if let Some(to) = &filter.to {
        clauses.push("scheduled_date <= ?");
        values.push(Box::new(day(to)));
    }
    if let Some(payment_status) = filter.payment_status {
        clauses.push("payment_status = ?");
        values.push(Box::new(payment_status.as_str()));
    }
    if let Some(plate) = &filter.plate_number {
        // LIKE is case-insensitive for ASCII in SQLite
        clauses.push("plate_number LIKE '%' || ? || '%' ESCAPE '\\'");
        values.push(Box::new(escape_like(plate)));
    }

    let mut sql = "SELECT data FROM bookings".to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY scheduled_date DESC, start_time DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Box::new(limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(parse_booking(&row?)?);
    }
    Ok(bookings)
}

/// Make `%`, `_` and the escape character itself match literally under `ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_booking(json: &str) -> anyhow::Result<Booking> {
    serde_json::from_str(json).context("corrupt booking record")
}
