use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday};

use crate::model::{Ms, Span};

/// Default offset: Africa/Tunis, UTC+01:00 all year.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 60;

/// Local wall-clock calendar at a fixed UTC offset.
///
/// Every conversion between a local `date + HH:MM` and an instant goes through
/// here, so ranges built from strings and ranges built from instants agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::from_offset_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or_else(|| Self::new(Utc.fix()))
    }
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// `None` if the offset is not strictly within ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Instant of local `date` at local `time`.
    pub fn instant(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        // A fixed offset has no gaps or folds, so the mapping is always unique.
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| date.and_time(time).and_utc().timestamp_millis())
    }

    /// Local midnight to next local midnight.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.instant(date, NaiveTime::MIN);
        let end = match date.checked_add_days(Days::new(1)) {
            Some(next) => self.instant(next, NaiveTime::MIN),
            None => start + crate::model::DAY_MS,
        };
        Span::new(start, end)
    }

    /// `[date open, date close)` for a window of local times.
    pub fn window(&self, date: NaiveDate, open: NaiveTime, close: NaiveTime) -> Option<Span> {
        Span::try_new(self.instant(date, open), self.instant(date, close))
    }

    fn local(&self, t: Ms) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(t).map(|utc| utc.with_timezone(&self.offset))
    }

    pub fn local_date(&self, t: Ms) -> Option<NaiveDate> {
        self.local(t).map(|dt| dt.date_naive())
    }

    pub fn local_time(&self, t: Ms) -> Option<NaiveTime> {
        self.local(t).map(|dt| dt.time())
    }

    pub fn weekday(&self, date: NaiveDate) -> Weekday {
        date.weekday()
    }

    /// Render an instant as local `YYYY-MM-DD HH:MM` for messages.
    pub fn display(&self, t: Ms) -> String {
        match self.local(t) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => t.to_string(),
        }
    }
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse `HH:MM` (or `HH:MM:SS`).
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}
