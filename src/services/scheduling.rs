use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::SchedulingConfig;
use crate::errors::{AppError, AppResult};
use crate::models::availability::{hhmm, is_whole_minute};
use crate::models::{
    Booking, BookingStatus, PaymentStatus, Priority, ServiceDefinition, TimeInterval,
    VehicleSnapshot,
};
use crate::services::calendar::SlotCalendar;
use crate::services::catalog::{is_eligible, Catalog, ServiceFilter};
use crate::services::lifecycle::BookingDraft;
use crate::services::pricing::{self, round_money, PricingContext, Quote};
use crate::services::store::{BookingFilter, BookingStore, CustomerStore};

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Attempts for an update whose booking keeps changing underneath it.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRequest {
    pub service_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub customer_id: String,
    pub vehicle: VehicleSnapshot,
    pub services: Vec<LineRequest>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    pub resource: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub notes: Option<String>,
    #[serde(default)]
    pub discount_amount: Decimal,
    pub idempotency_key: Option<String>,
    pub actor: Option<String>,
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBookingRequest {
    pub services: Option<Vec<LineRequest>>,
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "hhmm::deserialize_option")]
    pub start: Option<NaiveTime>,
    pub resource: Option<String>,
    pub notes: Option<String>,
    pub priority: Option<Priority>,
    pub discount_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    pub resource: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rescheduled {
    pub original: Booking,
    pub replacement: Booking,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub bookings: u64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_bookings: u64,
    pub by_status: BTreeMap<BookingStatus, u64>,
    pub pending_count: u64,
    /// Active bookings whose payment is neither paid nor refunded.
    pub awaiting_settlement: u64,
    /// Sum of totals over completed bookings that are paid.
    pub revenue: Decimal,
    pub currency: String,
    pub daily: Vec<DailySummary>,
}

/// Entry point for every booking operation. Validation happens before anything is written;
/// the write itself is delegated to the [`BookingStore`] commit.
pub struct SchedulingService {
    catalog: Catalog,
    customers: Arc<dyn CustomerStore>,
    bookings: Arc<dyn BookingStore>,
    config: SchedulingConfig,
}

impl SchedulingService {
    pub fn new(
        catalog: Catalog,
        customers: Arc<dyn CustomerStore>,
        bookings: Arc<dyn BookingStore>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            catalog,
            customers,
            bookings,
            config,
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub async fn list_active_services(
        &self,
        filter: &ServiceFilter,
    ) -> AppResult<Vec<ServiceDefinition>> {
        self.catalog.list_active_services(filter).await
    }

    pub async fn create_booking(&self, req: CreateBookingRequest) -> AppResult<Booking> {
        if self
            .customers
            .find_customer_by_id(&req.customer_id)
            .await?
            .is_none()
        {
            return Err(AppError::CustomerNotFound(req.customer_id));
        }

        let services = self.resolve_services(&req.services, &req.vehicle).await?;
        let quote = self.quote(&services, &req.vehicle, req.date, req.discount_amount)?;
        let interval = self.interval_for(req.date, req.start, &quote)?;
        let resource = self.resource_or_default(req.resource)?;

        let booking = Booking::open(
            BookingDraft {
                customer_id: req.customer_id,
                vehicle: req.vehicle,
                resource,
                interval,
                priority: req.priority,
                notes: req.notes,
                idempotency_key: req.idempotency_key,
                rescheduled_from: None,
                actor: req.actor.unwrap_or_else(|| "customer".to_string()),
            },
            quote,
            now(),
        );

        let booking = self.bookings.insert_booking(booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_number = %booking.booking_number,
            resource = %booking.resource,
            date = %booking.interval.date,
            start = %booking.interval.start,
            total = %booking.pricing.total_amount,
            "booking created"
        );
        Ok(booking)
    }

    /// Apply a partial update. The new price and interval are worked out from the booking as
    /// read; if another change commits first the update starts over from the fresh booking.
    pub async fn update_booking(&self, id: &str, req: UpdateBookingRequest) -> AppResult<Booking> {
        let mut attempt = 1;
        loop {
            match self.try_update(id, req.clone()).await {
                Err(AppError::BookingChanged(_)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(booking_id = id, attempt, "booking changed during update, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_update(&self, id: &str, req: UpdateBookingRequest) -> AppResult<Booking> {
        let current = self.get_booking(id).await?;
        current.ensure_modifiable()?;

        let reschedules = req.date.is_some() || req.start.is_some() || req.resource.is_some();
        let reprice = req.services.is_some() || reschedules || req.discount_amount.is_some();

        let quote = if reprice {
            let lines = match &req.services {
                Some(lines) => lines.clone(),
                None => lines_of(&current),
            };
            let services = self.resolve_services(&lines, &current.vehicle).await?;
            let date = req.date.unwrap_or(current.interval.date);
            let discount = req
                .discount_amount
                .unwrap_or(current.pricing.discount_amount);
            Some(self.quote(&services, &current.vehicle, date, discount)?)
        } else {
            None
        };

        let interval = match &quote {
            Some(quote) => Some(self.interval_for(
                req.date.unwrap_or(current.interval.date),
                req.start.unwrap_or(current.interval.start),
                quote,
            )?),
            None => None,
        };
        let resource = match req.resource {
            Some(resource) => Some(self.resource_or_default(Some(resource))?),
            None => None,
        };

        let notes = req.notes;
        let priority = req.priority;
        let revision = current.revision;
        let booking = self
            .bookings
            .modify_booking(
                id,
                Box::new(move |b| {
                    ensure_revision(b, revision)?;
                    b.ensure_modifiable()?;
                    let at = now();
                    if let Some(quote) = quote {
                        b.apply_quote(quote, at);
                    }
                    if let Some(interval) = interval {
                        b.interval = interval;
                    }
                    if let Some(resource) = resource {
                        b.resource = resource;
                    }
                    if notes.is_some() {
                        b.notes = notes;
                    }
                    if let Some(priority) = priority {
                        b.priority = priority;
                    }
                    b.updated_at = at;
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            resource = %booking.resource,
            date = %booking.interval.date,
            start = %booking.interval.start,
            total = %booking.pricing.total_amount,
            "booking updated"
        );
        Ok(booking)
    }

    pub async fn transition_status(
        &self,
        id: &str,
        to: BookingStatus,
        actor: &str,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let actor_name = actor.to_string();
        let booking = self
            .bookings
            .modify_booking(
                id,
                Box::new(move |b| {
                    if to == BookingStatus::Rescheduled {
                        return Err(AppError::InvalidTransition { from: b.status, to });
                    }
                    b.transition(to, &actor_name, reason, now())
                }),
            )
            .await?;

        tracing::info!(booking_id = %booking.id, status = %booking.status, actor, "booking status changed");
        Ok(booking)
    }

    pub async fn cancel_booking(
        &self,
        id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        self.transition_status(id, BookingStatus::Cancelled, actor, reason)
            .await
    }

    /// Move a modifiable booking to a new slot. The original is marked `rescheduled` and a new
    /// `pending` booking is inserted, priced for the new date, in a single commit.
    pub async fn reschedule_booking(
        &self,
        id: &str,
        req: RescheduleRequest,
        actor: &str,
    ) -> AppResult<Rescheduled> {
        let mut attempt = 1;
        loop {
            match self.try_reschedule(id, req.clone(), actor).await {
                Err(AppError::BookingChanged(_)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(booking_id = id, attempt, "booking changed during reschedule, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_reschedule(
        &self,
        id: &str,
        req: RescheduleRequest,
        actor: &str,
    ) -> AppResult<Rescheduled> {
        let original = self.get_booking(id).await?;
        original.ensure_modifiable()?;

        let services = self
            .resolve_services(&lines_of(&original), &original.vehicle)
            .await?;
        let quote = self.quote(
            &services,
            &original.vehicle,
            req.date,
            original.pricing.discount_amount,
        )?;
        let interval = self.interval_for(req.date, req.start, &quote)?;
        let resource = match req.resource {
            Some(resource) => self.resource_or_default(Some(resource))?,
            None => original.resource.clone(),
        };

        let replacement = Booking::open(
            BookingDraft {
                customer_id: original.customer_id.clone(),
                vehicle: original.vehicle.clone(),
                resource,
                interval,
                priority: original.priority,
                notes: original.notes.clone(),
                idempotency_key: None,
                rescheduled_from: Some(original.id.clone()),
                actor: actor.to_string(),
            },
            quote,
            now(),
        );

        let actor_name = actor.to_string();
        let reason = req.reason;
        let revision = original.revision;
        let (original, replacement) = self
            .bookings
            .replace_booking(
                id,
                Box::new(move |b| {
                    ensure_revision(b, revision)?;
                    b.ensure_modifiable()?;
                    b.transition(BookingStatus::Rescheduled, &actor_name, reason, now())
                }),
                replacement,
            )
            .await?;

        tracing::info!(
            booking_id = %original.id,
            replacement_id = %replacement.id,
            date = %replacement.interval.date,
            start = %replacement.interval.start,
            "booking rescheduled"
        );
        Ok(Rescheduled {
            original,
            replacement,
        })
    }

    pub async fn get_booking(&self, id: &str) -> AppResult<Booking> {
        self.bookings
            .get_booking(id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(id.to_string()))
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> AppResult<Vec<Booking>> {
        self.bookings.list_bookings(filter).await
    }

    /// Free slots of `duration_minutes` on `resource` (the default resource when `None`).
    pub async fn get_availability(
        &self,
        resource: Option<&str>,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> AppResult<Vec<TimeInterval>> {
        let resource = resource.unwrap_or(self.config.default_resource.as_str());
        let occupied = self.bookings.active_bookings_on(resource, date).await?;
        let calendar = SlotCalendar::from_bookings(resource, date, &occupied);

        Ok(calendar.available_slots(
            duration_minutes,
            self.config.slot_granularity_minutes,
            &self.config.business_hours,
        ))
    }

    /// Total minutes a booking with these lines would take.
    pub async fn duration_for(&self, lines: &[LineRequest]) -> AppResult<u32> {
        let mut total: u32 = 0;
        for line in lines {
            let service = self.catalog.get_service(&line.service_id).await?;
            total = service
                .duration_minutes
                .checked_mul(line.quantity)
                .and_then(|minutes| total.checked_add(minutes))
                .ok_or_else(|| AppError::InvalidRequest("booking is too long".to_string()))?;
        }
        Ok(total)
    }

    pub async fn dashboard_summary(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<DashboardSummary> {
        if from > to {
            return Err(AppError::InvalidRequest(format!(
                "date range is reversed: {from} > {to}"
            )));
        }

        let bookings = self
            .bookings
            .list_bookings(&BookingFilter {
                from: Some(from),
                to: Some(to),
                ..Default::default()
            })
            .await?;

        let mut by_status: BTreeMap<BookingStatus, u64> = BTreeMap::new();
        let mut daily: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();
        let mut revenue = Decimal::ZERO;
        let mut awaiting_settlement = 0;

        for booking in &bookings {
            *by_status.entry(booking.status).or_default() += 1;
            if booking.awaiting_settlement() {
                awaiting_settlement += 1;
            }

            let date = booking.interval.date;
            let day = daily.entry(date).or_insert_with(|| DailySummary {
                date,
                bookings: 0,
                revenue: Decimal::ZERO,
            });
            day.bookings += 1;

            if booking.status == BookingStatus::Completed
                && booking.payment.status == PaymentStatus::Paid
            {
                revenue += booking.pricing.total_amount;
                day.revenue += booking.pricing.total_amount;
            }
        }

        Ok(DashboardSummary {
            from,
            to,
            total_bookings: bookings.len() as u64,
            pending_count: by_status
                .get(&BookingStatus::Pending)
                .copied()
                .unwrap_or(0),
            awaiting_settlement,
            by_status,
            revenue: round_money(revenue),
            currency: self.config.currency.clone(),
            daily: daily
                .into_values()
                .map(|mut d| {
                    d.revenue = round_money(d.revenue);
                    d
                })
                .collect(),
        })
    }

    /// Look up every line's service and check that it is active and accepts the vehicle.
    async fn resolve_services(
        &self,
        lines: &[LineRequest],
        vehicle: &VehicleSnapshot,
    ) -> AppResult<Vec<(ServiceDefinition, u32)>> {
        if lines.is_empty() {
            return Err(AppError::InvalidRequest(
                "a booking needs at least one service".to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            let service = self.catalog.get_service(&line.service_id).await?;
            if !service.active {
                return Err(AppError::ServiceNotFound(line.service_id.clone()));
            }
            if !is_eligible(&service, vehicle.vehicle_type) {
                return Err(AppError::ServiceIneligible {
                    service_id: service.id,
                    vehicle_type: vehicle
                        .vehicle_type
                        .map(|vt| vt.as_str().to_string())
                        .unwrap_or_default(),
                });
            }
            resolved.push((service, line.quantity));
        }
        Ok(resolved)
    }

    fn quote(
        &self,
        services: &[(ServiceDefinition, u32)],
        vehicle: &VehicleSnapshot,
        date: NaiveDate,
        discount_amount: Decimal,
    ) -> AppResult<Quote> {
        let lines: Vec<(&ServiceDefinition, u32)> =
            services.iter().map(|(s, qty)| (s, *qty)).collect();
        pricing::price(
            &lines,
            &PricingContext {
                date,
                vehicle_type: vehicle.vehicle_type,
                discount_amount,
                tax_rate: self.config.tax_rate,
                currency: self.config.currency.clone(),
            },
        )
    }

    fn interval_for(&self, date: NaiveDate, start: NaiveTime, quote: &Quote) -> AppResult<TimeInterval> {
        if !is_whole_minute(start) {
            return Err(AppError::InvalidInterval(format!(
                "start {} must fall on a whole minute",
                start.format("%H:%M:%S%.f")
            )));
        }
        let hours = &self.config.business_hours;
        let interval = TimeInterval::starting_at(date, start, quote.estimated_duration_minutes)
            .ok_or_else(|| {
                AppError::InvalidInterval(format!(
                    "{} minutes from {} runs past the end of the day",
                    quote.estimated_duration_minutes,
                    start.format("%H:%M")
                ))
            })?;

        if !hours.contains(&interval) {
            return Err(AppError::InvalidInterval(format!(
                "{}-{} is outside business hours {}",
                interval.start.format("%H:%M"),
                interval.end.format("%H:%M"),
                hours.to_human_readable()
            )));
        }
        Ok(interval)
    }

    fn resource_or_default(&self, resource: Option<String>) -> AppResult<String> {
        match resource {
            Some(r) if r.trim().is_empty() => Err(AppError::InvalidRequest(
                "resource cannot be blank".to_string(),
            )),
            Some(r) => Ok(r.trim().to_string()),
            None => Ok(self.config.default_resource.clone()),
        }
    }
}

/// Refuse to apply a change computed from an older copy of the booking.
fn ensure_revision(booking: &Booking, expected: u32) -> AppResult<()> {
    if booking.revision == expected {
        Ok(())
    } else {
        Err(AppError::BookingChanged(booking.id.clone()))
    }
}

fn lines_of(booking: &Booking) -> Vec<LineRequest> {
    booking
        .line_items
        .iter()
        .map(|l| LineRequest {
            service_id: l.service_id.clone(),
            quantity: l.quantity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::availability::parse_time;
    use crate::models::{BusinessHours, Customer, Promotion, VehicleType};
    use crate::services::store::BookingChange;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn service(id: &str, cents: i64, minutes: u32) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            name: id.to_uppercase(),
            category: "maintenance".to_string(),
            base_price: Decimal::new(cents, 2),
            currency: "SAR".to_string(),
            duration_minutes: minutes,
            vehicle_types: vec![],
            seasonal_pricing: vec![],
            promotions: vec![],
            active: true,
        }
    }

    fn setup() -> (SchedulingService, SqliteStore) {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .save_customer(&Customer {
                id: "cust-1".to_string(),
                name: "Sara".to_string(),
                phone: Some("+966500000001".to_string()),
                email: None,
            })
            .unwrap();
        store.save_service(&service("oil", 15000, 30)).unwrap();
        store.save_service(&service("wash", 8000, 30)).unwrap();

        let mut trucks_only = service("tow", 20000, 60);
        trucks_only.vehicle_types = vec![VehicleType::Truck];
        store.save_service(&trucks_only).unwrap();

        let mut retired = service("wax", 5000, 30);
        retired.active = false;
        store.save_service(&retired).unwrap();

        let config = SchedulingConfig {
            business_hours: BusinessHours::parse("09:00", "18:00").unwrap(),
            ..Default::default()
        };
        let shared = Arc::new(store.clone());
        let scheduler = SchedulingService::new(
            Catalog::new(shared.clone()),
            shared.clone(),
            shared,
            config,
        );
        (scheduler, store)
    }

    /// Booking store that lets another writer commit `pending` just before the next write.
    struct InterleavingStore {
        inner: SqliteStore,
        pending: std::sync::Mutex<Option<BookingChange>>,
    }

    impl InterleavingStore {
        fn new(inner: SqliteStore, change: BookingChange) -> Self {
            Self {
                inner,
                pending: std::sync::Mutex::new(Some(change)),
            }
        }

        async fn interleave(&self, id: &str) {
            let change = self.pending.lock().unwrap().take();
            if let Some(change) = change {
                self.inner.modify_booking(id, change).await.unwrap();
            }
        }
    }

    #[async_trait::async_trait]
    impl BookingStore for InterleavingStore {
        async fn get_booking(&self, id: &str) -> AppResult<Option<Booking>> {
            self.inner.get_booking(id).await
        }

        async fn insert_booking(&self, booking: Booking) -> AppResult<Booking> {
            self.inner.insert_booking(booking).await
        }

        async fn modify_booking(&self, id: &str, change: BookingChange) -> AppResult<Booking> {
            self.interleave(id).await;
            self.inner.modify_booking(id, change).await
        }

        async fn replace_booking(
            &self,
            id: &str,
            change: BookingChange,
            replacement: Booking,
        ) -> AppResult<(Booking, Booking)> {
            self.interleave(id).await;
            self.inner.replace_booking(id, change, replacement).await
        }

        async fn active_bookings_on(
            &self,
            resource: &str,
            date: NaiveDate,
        ) -> AppResult<Vec<Booking>> {
            self.inner.active_bookings_on(resource, date).await
        }

        async fn list_bookings(&self, filter: &BookingFilter) -> AppResult<Vec<Booking>> {
            self.inner.list_bookings(filter).await
        }
    }

    fn vehicle(vehicle_type: Option<VehicleType>) -> VehicleSnapshot {
        VehicleSnapshot {
            plate_number: "ABC1234".to_string(),
            make: Some("Toyota".to_string()),
            model: Some("Hilux".to_string()),
            year: Some(2021),
            mileage: None,
            vehicle_type,
        }
    }

    fn request(start: &str, lines: &[(&str, u32)]) -> CreateBookingRequest {
        CreateBookingRequest {
            customer_id: "cust-1".to_string(),
            vehicle: vehicle(Some(VehicleType::Sedan)),
            services: lines
                .iter()
                .map(|(id, qty)| LineRequest {
                    service_id: id.to_string(),
                    quantity: *qty,
                })
                .collect(),
            date: d("2024-06-01"),
            start: t(start),
            resource: Some("bay1".to_string()),
            priority: Priority::Normal,
            notes: None,
            discount_amount: Decimal::ZERO,
            idempotency_key: None,
            actor: None,
        }
    }

    #[tokio::test]
    async fn test_create_prices_and_schedules() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 2), ("wash", 1)]))
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.pricing.subtotal, Decimal::new(38000, 2));
        assert_eq!(booking.pricing.tax_amount, Decimal::new(5700, 2));
        assert_eq!(booking.pricing.total_amount, Decimal::new(43700, 2));
        assert_eq!(booking.estimated_duration_minutes, 90);
        assert_eq!(booking.interval.end, t("11:30"));
        assert!(booking.booking_number.starts_with("BK"));
        assert_eq!(booking.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_create_error_contracts() {
        let (scheduler, _) = setup();

        let mut unknown_customer = request("10:00", &[("oil", 1)]);
        unknown_customer.customer_id = "nobody".to_string();
        assert!(matches!(
            scheduler.create_booking(unknown_customer).await,
            Err(AppError::CustomerNotFound(_))
        ));

        assert!(matches!(
            scheduler.create_booking(request("10:00", &[("ghost", 1)])).await,
            Err(AppError::ServiceNotFound(_))
        ));
        assert!(matches!(
            scheduler.create_booking(request("10:00", &[("wax", 1)])).await,
            Err(AppError::ServiceNotFound(_))
        ));
        assert!(matches!(
            scheduler.create_booking(request("10:00", &[("tow", 1)])).await,
            Err(AppError::ServiceIneligible { .. })
        ));
        assert!(matches!(
            scheduler.create_booking(request("17:45", &[("oil", 1)])).await,
            Err(AppError::InvalidInterval(_))
        ));
        assert!(matches!(
            scheduler.create_booking(request("08:30", &[("oil", 1)])).await,
            Err(AppError::InvalidInterval(_))
        ));
        assert!(matches!(
            scheduler.create_booking(request("10:00:45", &[("oil", 1)])).await,
            Err(AppError::InvalidInterval(_))
        ));

        let none = scheduler
            .list_bookings(&BookingFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_vehicle_type_is_accepted() {
        let (scheduler, _) = setup();
        let mut req = request("10:00", &[("tow", 1)]);
        req.vehicle = vehicle(None);
        assert!(scheduler.create_booking(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_create_is_rejected() {
        let (scheduler, _) = setup();
        scheduler
            .create_booking(request("10:00", &[("oil", 2)]))
            .await
            .unwrap();

        let err = scheduler
            .create_booking(request("10:30", &[("oil", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable { .. }));

        // touching the end of the existing booking is fine
        scheduler
            .create_booking(request("11:00", &[("oil", 1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_availability_reflects_bookings() {
        let (scheduler, _) = setup();
        scheduler
            .create_booking(request("10:00", &[("oil", 2)]))
            .await
            .unwrap();

        let slots = scheduler
            .get_availability(Some("bay1"), d("2024-06-01"), 60)
            .await
            .unwrap();
        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start).collect();

        assert!(starts.contains(&t("09:00")));
        assert!(!starts.contains(&t("09:30")));
        assert!(!starts.contains(&t("10:00")));
        assert!(!starts.contains(&t("10:30")));
        assert!(starts.contains(&t("11:00")));

        let other_bay = scheduler
            .get_availability(Some("bay2"), d("2024-06-01"), 60)
            .await
            .unwrap();
        assert_eq!(other_bay.len(), 17);
    }

    #[tokio::test]
    async fn test_completed_booking_cannot_go_back() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();
        for status in [
            BookingStatus::Confirmed,
            BookingStatus::InProgress,
            BookingStatus::Completed,
        ] {
            scheduler
                .transition_status(&booking.id, status, "staff", None)
                .await
                .unwrap();
        }

        let err = scheduler
            .transition_status(&booking.id, BookingStatus::Confirmed, "staff", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let stored = scheduler.get_booking(&booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);
        assert_eq!(stored.status_history.len(), 4);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_to_rescheduled_is_refused() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();
        let err = scheduler
            .transition_status(&booking.id, BookingStatus::Rescheduled, "staff", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_frees_the_slot() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        let cancelled = scheduler
            .cancel_booking(&booking.id, "front-desk", Some("customer called".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("front-desk"));

        scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        assert!(matches!(
            scheduler.cancel_booking(&booking.id, "staff", None).await,
            Err(AppError::InvalidTransition { .. })
        ));
        assert!(matches!(
            scheduler.cancel_booking("missing", "staff", None).await,
            Err(AppError::BookingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_reprices_and_moves() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        let updated = scheduler
            .update_booking(
                &booking.id,
                UpdateBookingRequest {
                    services: Some(vec![
                        LineRequest {
                            service_id: "oil".to_string(),
                            quantity: 2,
                        },
                        LineRequest {
                            service_id: "wash".to_string(),
                            quantity: 1,
                        },
                    ]),
                    start: Some(t("10:30")),
                    notes: Some("bring spare key".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.pricing.total_amount, Decimal::new(43700, 2));
        assert_eq!(updated.interval.start, t("10:30"));
        assert_eq!(updated.interval.end, t("12:00"));
        assert_eq!(updated.notes.as_deref(), Some("bring spare key"));
        assert_eq!(updated.booking_number, booking.booking_number);
    }

    #[tokio::test]
    async fn test_update_checks_conflicts_with_others_only() {
        let (scheduler, _) = setup();
        let first = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();
        scheduler
            .create_booking(request("11:00", &[("oil", 1)]))
            .await
            .unwrap();

        // overlapping its own slot is fine
        scheduler
            .update_booking(
                &first.id,
                UpdateBookingRequest {
                    start: Some(t("10:15")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = scheduler
            .update_booking(
                &first.id,
                UpdateBookingRequest {
                    start: Some(t("10:45")),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable { .. }));
        let stored = scheduler.get_booking(&first.id).await.unwrap();
        assert_eq!(stored.interval.start, t("10:15"));
    }

    #[tokio::test]
    async fn test_update_outside_modifiable_states() {
        let (scheduler, _) = setup();
        let paths: [(&str, &[BookingStatus]); 4] = [
            ("09:00", &[BookingStatus::Confirmed, BookingStatus::InProgress]),
            (
                "10:00",
                &[
                    BookingStatus::Confirmed,
                    BookingStatus::InProgress,
                    BookingStatus::Completed,
                ],
            ),
            ("11:00", &[BookingStatus::Cancelled]),
            ("12:00", &[BookingStatus::Confirmed, BookingStatus::NoShow]),
        ];

        let mut locked = vec![];
        for (start, path) in paths {
            let booking = scheduler
                .create_booking(request(start, &[("oil", 1)]))
                .await
                .unwrap();
            for status in path {
                scheduler
                    .transition_status(&booking.id, *status, "staff", None)
                    .await
                    .unwrap();
            }
            locked.push(booking.id);
        }

        let moved = scheduler
            .create_booking(request("13:00", &[("oil", 1)]))
            .await
            .unwrap();
        scheduler
            .reschedule_booking(
                &moved.id,
                RescheduleRequest {
                    date: d("2024-06-02"),
                    start: t("13:00"),
                    resource: None,
                    reason: None,
                },
                "customer",
            )
            .await
            .unwrap();
        locked.push(moved.id);

        for id in &locked {
            let before = scheduler.get_booking(id).await.unwrap();
            let err = scheduler
                .update_booking(
                    id,
                    UpdateBookingRequest {
                        notes: Some("late".to_string()),
                        start: Some(t("15:00")),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::BookingNotModifiable { .. }),
                "{} accepted an update",
                before.status
            );
            let stored = scheduler.get_booking(id).await.unwrap();
            assert_eq!(stored.notes, None);
            assert_eq!(stored.interval, before.interval);
        }
    }

    #[tokio::test]
    async fn test_concurrent_update_is_not_lost() {
        let (scheduler, store) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        let interleaved = Arc::new(InterleavingStore::new(
            store.clone(),
            Box::new(
                |b: &mut Booking| -> AppResult<()> {
                    b.line_items[0].quantity = 3;
                    b.notes = Some("three oil changes".to_string());
                    Ok(())
                },
            ),
        ));
        let racing = SchedulingService::new(
            Catalog::new(Arc::new(store.clone())),
            Arc::new(store.clone()),
            interleaved,
            scheduler.config().clone(),
        );

        let updated = racing
            .update_booking(
                &booking.id,
                UpdateBookingRequest {
                    start: Some(t("11:00")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // the other writer's change survives and this update is applied on top of it
        assert_eq!(updated.notes.as_deref(), Some("three oil changes"));
        assert_eq!(updated.line_items[0].quantity, 3);
        assert_eq!(updated.estimated_duration_minutes, 90);
        assert_eq!(updated.interval.start, t("11:00"));
        assert_eq!(updated.interval.end, t("12:30"));
        assert_eq!(updated.revision, 2);
    }

    #[tokio::test]
    async fn test_stale_reschedule_starts_over() {
        let (scheduler, store) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        let interleaved = Arc::new(InterleavingStore::new(
            store.clone(),
            Box::new(
                |b: &mut Booking| -> AppResult<()> {
                    b.transition(BookingStatus::Cancelled, "staff", None, now())
                },
            ),
        ));
        let racing = SchedulingService::new(
            Catalog::new(Arc::new(store.clone())),
            Arc::new(store.clone()),
            interleaved,
            scheduler.config().clone(),
        );

        let err = racing
            .reschedule_booking(
                &booking.id,
                RescheduleRequest {
                    date: d("2024-06-03"),
                    start: t("10:00"),
                    resource: None,
                    reason: None,
                },
                "customer",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BookingNotModifiable { .. }));
        let all = store.list_bookings(&BookingFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_booking() {
        let (scheduler, store) = setup();
        let mut promo = service("oil", 15000, 30);
        promo.promotions = vec![Promotion {
            title: "July".to_string(),
            discount_percent: Decimal::new(10, 0),
            valid_from: d("2024-07-01"),
            valid_to: d("2024-07-31"),
            active: true,
        }];
        store.save_service(&promo).unwrap();

        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();

        let result = scheduler
            .reschedule_booking(
                &booking.id,
                RescheduleRequest {
                    date: d("2024-07-02"),
                    start: t("14:00"),
                    resource: None,
                    reason: Some("customer travelling".to_string()),
                },
                "customer",
            )
            .await
            .unwrap();

        assert_eq!(result.original.status, BookingStatus::Rescheduled);
        assert_eq!(result.replacement.status, BookingStatus::Pending);
        assert_eq!(result.replacement.rescheduled_from.as_deref(), Some(booking.id.as_str()));
        assert_eq!(result.replacement.resource, "bay1");
        assert_eq!(result.replacement.line_items[0].unit_price, Decimal::new(13500, 2));
        assert_ne!(result.replacement.booking_number, booking.booking_number);

        // the old slot is free again
        scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reschedule_into_taken_slot_changes_nothing() {
        let (scheduler, _) = setup();
        let booking = scheduler
            .create_booking(request("10:00", &[("oil", 1)]))
            .await
            .unwrap();
        scheduler
            .create_booking(request("14:00", &[("oil", 1)]))
            .await
            .unwrap();

        let err = scheduler
            .reschedule_booking(
                &booking.id,
                RescheduleRequest {
                    date: d("2024-06-01"),
                    start: t("14:00"),
                    resource: None,
                    reason: None,
                },
                "customer",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable { .. }));

        let stored = scheduler.get_booking(&booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        let all = scheduler
            .list_bookings(&BookingFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_create() {
        let (scheduler, _) = setup();
        let mut req = request("10:00", &[("oil", 1)]);
        req.idempotency_key = Some("retry-42".to_string());

        let first = scheduler.create_booking(req.clone()).await.unwrap();
        let second = scheduler.create_booking(req).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.booking_number, second.booking_number);
    }

    #[tokio::test]
    async fn test_dashboard_summary() {
        let (scheduler, store) = setup();
        let done = scheduler
            .create_booking(request("10:00", &[("oil", 2), ("wash", 1)]))
            .await
            .unwrap();
        for status in [
            BookingStatus::Confirmed,
            BookingStatus::InProgress,
            BookingStatus::Completed,
        ] {
            scheduler
                .transition_status(&done.id, status, "staff", None)
                .await
                .unwrap();
        }
        store
            .modify_booking(
                &done.id,
                Box::new(|b| {
                    b.payment.status = PaymentStatus::Paid;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        scheduler
            .create_booking(request("14:00", &[("oil", 1)]))
            .await
            .unwrap();
        let mut later = request("09:00", &[("wash", 1)]);
        later.date = d("2024-06-03");
        scheduler.create_booking(later).await.unwrap();
        let mut dropped = request("11:00", &[("wash", 1)]);
        dropped.date = d("2024-06-03");
        let dropped = scheduler.create_booking(dropped).await.unwrap();
        scheduler
            .cancel_booking(&dropped.id, "customer", None)
            .await
            .unwrap();

        let summary = scheduler
            .dashboard_summary(d("2024-06-01"), d("2024-06-30"))
            .await
            .unwrap();

        assert_eq!(summary.total_bookings, 4);
        assert_eq!(summary.pending_count, 2);
        assert_eq!(summary.by_status.get(&BookingStatus::Completed), Some(&1));
        assert_eq!(summary.by_status.get(&BookingStatus::Cancelled), Some(&1));
        assert_eq!(summary.revenue, Decimal::new(43700, 2));
        // the two pending bookings; neither the paid nor the cancelled one
        assert_eq!(summary.awaiting_settlement, 2);
        assert_eq!(summary.daily.len(), 2);
        assert_eq!(summary.daily[0].date, d("2024-06-01"));
        assert_eq!(summary.daily[0].bookings, 2);
        assert_eq!(summary.daily[1].revenue, Decimal::new(0, 2));

        assert!(matches!(
            scheduler
                .dashboard_summary(d("2024-06-30"), d("2024-06-01"))
                .await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_never_double_book() {
        let (scheduler, _) = setup();
        let scheduler = Arc::new(scheduler);

        let starts = ["10:00", "10:30", "10:00", "11:00", "10:30", "09:30", "10:00", "11:30"];
        let mut handles = vec![];
        for start in starts {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move {
                scheduler.create_booking(request(start, &[("oil", 2)])).await
            }));
        }

        let mut created = vec![];
        for handle in handles {
            match handle.await.unwrap() {
                Ok(booking) => created.push(booking),
                Err(AppError::SlotUnavailable { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(!created.is_empty());

        let active = scheduler
            .list_bookings(&BookingFilter::default())
            .await
            .unwrap();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                assert!(!a.interval.overlaps(&b.interval), "{} overlaps {}", a.id, b.id);
            }
        }
    }
}
