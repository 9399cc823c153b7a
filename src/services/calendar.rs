use chrono::{NaiveDate, NaiveTime};

use crate::models::availability::minutes_of;
use crate::models::{Booking, BookingStatus, BusinessHours, TimeInterval};

/// A booked interval as seen by the calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEntry {
    pub booking_id: String,
    pub resource: String,
    pub interval: TimeInterval,
    pub status: BookingStatus,
}

impl From<&Booking> for CalendarEntry {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.clone(),
            resource: b.resource.clone(),
            interval: b.interval,
            status: b.status,
        }
    }
}

/// Occupancy of one resource on one day.
///
/// Built fresh from the bookings loaded at query time, never cached, so every answer reflects
/// the bookings committed when it was built.
#[derive(Debug, Clone)]
pub struct SlotCalendar {
    resource: String,
    date: NaiveDate,
    entries: Vec<CalendarEntry>,
}

impl SlotCalendar {
    /// Keep only entries for `resource` on `date`. Inactive entries are kept but never block.
    pub fn new(
        resource: &str,
        date: NaiveDate,
        entries: impl IntoIterator<Item = CalendarEntry>,
    ) -> Self {
        let mut entries: Vec<CalendarEntry> = entries
            .into_iter()
            .filter(|e| e.resource == resource && e.interval.date == date)
            .collect();
        entries.sort_by_key(|e| e.interval.start);
        Self {
            resource: resource.to_string(),
            date,
            entries,
        }
    }

    pub fn from_bookings<'a>(
        resource: &str,
        date: NaiveDate,
        bookings: impl IntoIterator<Item = &'a Booking>,
    ) -> Self {
        Self::new(resource, date, bookings.into_iter().map(CalendarEntry::from))
    }

    pub fn active_entries(&self) -> impl Iterator<Item = &CalendarEntry> {
        self.entries.iter().filter(|e| e.status.is_active())
    }

    /// The first active booking overlapping `interval` on `resource`, ignoring `exclude`.
    pub fn find_conflict(
        &self,
        resource: &str,
        interval: &TimeInterval,
        exclude: Option<&str>,
    ) -> Option<&CalendarEntry> {
        if resource != self.resource || interval.date != self.date {
            return None;
        }
        self.active_entries()
            .filter(|e| exclude != Some(e.booking_id.as_str()))
            .find(|e| e.interval.overlaps(interval))
    }

    pub fn has_conflict(
        &self,
        resource: &str,
        interval: &TimeInterval,
        exclude: Option<&str>,
    ) -> bool {
        self.find_conflict(resource, interval, exclude).is_some()
    }

    /// Candidate starts every `granularity_minutes` from opening time, keeping those that fit
    /// before closing and do not overlap an active booking. Ascending by start.
    pub fn available_slots(
        &self,
        duration_minutes: u32,
        granularity_minutes: u32,
        hours: &BusinessHours,
    ) -> Vec<TimeInterval> {
        if duration_minutes == 0
            || granularity_minutes == 0
            || duration_minutes > hours.window_minutes()
        {
            return Vec::new();
        }

        let open = minutes_of(hours.open);
        let close = minutes_of(hours.close);
        let mut slots = Vec::new();
        let mut start = open;

        while start + duration_minutes <= close {
            let candidate = NaiveTime::from_hms_opt(start / 60, start % 60, 0)
                .and_then(|t| TimeInterval::starting_at(self.date, t, duration_minutes));
            if let Some(slot) = candidate {
                if !self.has_conflict(&self.resource, &slot, None) {
                    slots.push(slot);
                }
            }
            start += granularity_minutes;
        }

        slots
    }
}
