use std::time::Instant;

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::MAX_AVAILABILITY_DAYS;
use crate::model::*;
use crate::observability::{AVAILABILITY_QUERIES_TOTAL, REQUEST_DURATION_SECONDS};

use super::availability::{derive_day_availability, free_windows};
use super::{Engine, EngineError};

impl Engine {
    /// Slot grid for one local day of a field.
    pub async fn get_day_availability(&self, field_id: Ulid, date: NaiveDate) -> Result<DayAvailability, EngineError> {
        let started = Instant::now();
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "kind" => "day").increment(1);

        let schedule = self.repo.get_field_schedule(field_id).await?;
        let existing = self
            .repo
            .find_active_bookings(field_id, self.calendar().day_span(date))
            .await?;
        let day = derive_day_availability(
            &schedule,
            self.calendar(),
            date,
            &existing,
            self.settings().slot_minutes,
            self.now(),
        );

        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => "day_availability")
            .record(started.elapsed().as_secs_f64());
        day
    }

    /// `days` consecutive days starting at `from`, bounded by the booking horizon.
    pub async fn get_availability_range(
        &self,
        field_id: Ulid,
        from: NaiveDate,
        days: u32,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        if days == 0 {
            return Err(EngineError::InvalidRange("at least one day is required".into()));
        }
        let max_days = self
            .settings()
            .policy
            .max_days_ahead
            .saturating_add(1)
            .min(MAX_AVAILABILITY_DAYS);
        if days > max_days {
            return Err(EngineError::LimitExceeded("availability range too long"));
        }
        let last = from
            .checked_add_days(Days::new(days as u64 - 1))
            .ok_or_else(|| EngineError::InvalidRange("date range out of bounds".into()))?;

        let started = Instant::now();
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "kind" => "range").increment(1);

        let calendar = self.calendar();
        let schedule = self.repo.get_field_schedule(field_id).await?;
        let window = Span::new(calendar.day_span(from).start, calendar.day_span(last).end);
        let existing = self.repo.find_active_bookings(field_id, window).await?;
        let now = self.now();

        let out = from
            .iter_days()
            .take(days as usize)
            .map(|date| {
                derive_day_availability(&schedule, calendar, date, &existing, self.settings().slot_minutes, now)
            })
            .collect::<Result<Vec<_>, _>>();

        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => "availability_range")
            .record(started.elapsed().as_secs_f64());
        out
    }

    /// Maximal bookable ranges left on `date`, ignoring slot boundaries.
    pub async fn get_free_windows(&self, field_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "kind" => "free").increment(1);
        let schedule = self.repo.get_field_schedule(field_id).await?;
        let existing = self
            .repo
            .find_active_bookings(field_id, self.calendar().day_span(date))
            .await?;
        Ok(free_windows(&schedule, self.calendar(), date, &existing, self.now()))
    }

    /// Every booking of the user, most recently created first.
    pub async fn list_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError> {
        let mut bookings = self.repo.list_user_bookings(user_id).await?;
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(bookings)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats, EngineError> {
        let bookings = self.repo.list_user_bookings(user_id).await?;
        let now = self.now();
        let mut stats = UserStats {
            total_bookings: bookings.len(),
            ..UserStats::default()
        };
        for b in &bookings {
            match b.status {
                BookingStatus::Completed => stats.completed_bookings += 1,
                BookingStatus::Cancelled => stats.cancelled_bookings += 1,
                BookingStatus::Pending | BookingStatus::Confirmed if b.span.start >= now => {
                    stats.upcoming_bookings += 1
                }
                _ => {}
            }
        }
        stats.total_spent = bookings
            .iter()
            .filter(|b| b.status != BookingStatus::Cancelled)
            .map(|b| b.total_price)
            .sum::<Decimal>();
        Ok(stats)
    }
}
