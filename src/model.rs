use chrono::{NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings block the field; terminal ones never do.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation of one field for one time range. The range never changes after
/// creation; rescheduling is a cancel plus a new booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub field_id: Ulid,
    pub user_id: String,
    pub span: Span,
    pub status: BookingStatus,
    pub total_price: Decimal,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Daily opening window in local time. `open < close`; no overnight windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Option<Self> {
        (open < close).then_some(Self { open, close })
    }
}

impl std::fmt::Display for OperatingHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.open.format("%H:%M"), self.close.format("%H:%M"))
    }
}

/// Pricing and weekly opening hours of a field, indexed Monday first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchedule {
    pub field_id: Ulid,
    pub name: Option<String>,
    pub price_per_hour: Decimal,
    pub weekly: [Option<OperatingHours>; 7],
    pub active: bool,
}

impl FieldSchedule {
    /// Same hours every day of the week.
    pub fn uniform(field_id: Ulid, name: Option<String>, price_per_hour: Decimal, hours: OperatingHours) -> Self {
        Self {
            field_id,
            name,
            price_per_hour,
            weekly: [Some(hours); 7],
            active: true,
        }
    }

    pub fn hours_on(&self, day: Weekday) -> Option<OperatingHours> {
        self.weekly[day.num_days_from_monday() as usize]
    }

    pub fn set_hours(&mut self, day: Weekday, hours: Option<OperatingHours>) {
        self.weekly[day.num_days_from_monday() as usize] = hours;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResult {
    pub has_conflict: bool,
    /// Every overlapping active booking, sorted by start.
    pub conflicting_bookings: Vec<Booking>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Open,
    Booked,
    Past,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub span: Span,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
    pub state: SlotState,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAvailability {
    pub field_id: Ulid,
    pub date: NaiveDate,
    pub slots: Vec<TimeSlot>,
    pub is_fully_booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationOutcome {
    pub booking: Booking,
    pub refund: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total_bookings: usize,
    pub upcoming_bookings: usize,
    pub completed_bookings: usize,
    pub cancelled_bookings: usize,
    pub total_spent: Decimal,
}

/// Flat, unnested events. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FieldUpserted {
        schedule: FieldSchedule,
    },
    FieldDeactivated {
        id: Ulid,
    },
    BookingPlaced {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        field_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
}
