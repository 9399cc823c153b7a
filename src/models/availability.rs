use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Opening window of a resource for one day. `open` is inclusive, `close` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

impl BusinessHours {
    pub fn parse(open: &str, close: &str) -> anyhow::Result<Self> {
        let open = parse_time(open)?;
        let close = parse_time(close)?;
        if open >= close {
            return Err(anyhow::anyhow!(
                "business hours must open before they close: {open}-{close}"
            ));
        }
        Ok(Self { open, close })
    }

    pub fn window_minutes(&self) -> u32 {
        minutes_of(self.close) - minutes_of(self.open)
    }

    pub fn contains(&self, interval: &TimeInterval) -> bool {
        interval.start >= self.open && interval.end <= self.close
    }

    pub fn to_human_readable(&self) -> String {
        format!("{}-{}", self.open.format("%H:%M"), self.close.format("%H:%M"))
    }
}

/// A half-open `[start, end)` stretch of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeInterval {
    /// Build an interval from a start and a length. Returns `None` when the length is zero,
    /// the start is not on a whole minute, or the interval would run past midnight.
    pub fn starting_at(date: NaiveDate, start: NaiveTime, duration_minutes: u32) -> Option<Self> {
        if duration_minutes == 0 || !is_whole_minute(start) {
            return None;
        }
        let end_minutes = minutes_of(start).checked_add(duration_minutes)?;
        // 24:00 is not representable, so an interval ending at midnight is rejected too.
        if end_minutes >= MINUTES_PER_DAY {
            return None;
        }
        let end = NaiveTime::from_hms_opt(end_minutes / 60, end_minutes % 60, 0)?;
        Some(Self { date, start, end })
    }

    pub fn duration_minutes(&self) -> u32 {
        minutes_of(self.end).saturating_sub(minutes_of(self.start))
    }

    /// Half-open overlap on the same day: touching intervals do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }
}

pub fn is_whole_minute(t: NaiveTime) -> bool {
    t.second() == 0 && t.nanosecond() == 0
}

pub(crate) fn minutes_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    let second: u32 = match parts.get(2) {
        Some(sec) => sec
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid second in: {s}"))?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}

/// Serde adapter for `HH:MM` wall-clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| super::parse_time(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
