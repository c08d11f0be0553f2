use chrono::{NaiveDate, TimeDelta};

use crate::calendar::Calendar;
use crate::limits::{MAX_SLOT_MINUTES, MIN_SLOT_MINUTES};
use crate::model::*;

use super::EngineError;
use super::pricing::price_for_duration;

// ── Slot derivation ───────────────────────────────────────────────

/// Partition the field's operating window on `date` into consecutive
/// `slot_minutes` slots and mark each one open, booked, or past.
///
/// A trailing partial slot is dropped. A slot is unavailable when it overlaps
/// an active booking or when its start is before `now`. Pure: identical inputs
/// and `now` give identical output.
pub fn derive_day_availability(
    schedule: &FieldSchedule,
    calendar: &Calendar,
    date: NaiveDate,
    existing: &[Booking],
    slot_minutes: u32,
    now: Ms,
) -> Result<DayAvailability, EngineError> {
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&slot_minutes) {
        return Err(EngineError::InvalidRange(format!(
            "slot size must be between {MIN_SLOT_MINUTES} and {MAX_SLOT_MINUTES} minutes"
        )));
    }

    let mut slots = Vec::new();
    let window = schedule
        .hours_on(calendar.weekday(date))
        .and_then(|hours| calendar.window(date, hours.open, hours.close).map(|w| (hours, w)));

    if let Some((hours, window)) = window {
        let blocked = active_spans(existing, &window);
        let slot_ms = slot_minutes as Ms * MINUTE_MS;
        let price = price_for_duration(schedule.price_per_hour, slot_ms);

        let mut offset = 0;
        while window.start + offset + slot_ms <= window.end {
            let span = Span::new(window.start + offset, window.start + offset + slot_ms);
            let state = if span.start < now {
                SlotState::Past
            } else if blocked.iter().any(|b| b.overlaps(&span)) {
                SlotState::Booked
            } else {
                SlotState::Open
            };
            let start = hours.open + TimeDelta::milliseconds(offset);
            slots.push(TimeSlot {
                span,
                start,
                end: start + TimeDelta::milliseconds(slot_ms),
                available: state == SlotState::Open,
                state,
                price,
            });
            offset += slot_ms;
        }
    }

    let is_fully_booked = slots.iter().all(|s| !s.available);
    Ok(DayAvailability {
        field_id: schedule.field_id,
        date,
        slots,
        is_fully_booked,
    })
}

/// Maximal free ranges inside the day's operating window: the window minus
/// the past minus every active booking.
pub fn free_windows(
    schedule: &FieldSchedule,
    calendar: &Calendar,
    date: NaiveDate,
    existing: &[Booking],
    now: Ms,
) -> Vec<Span> {
    let Some(hours) = schedule.hours_on(calendar.weekday(date)) else {
        return Vec::new();
    };
    let Some(window) = calendar.window(date, hours.open, hours.close) else {
        return Vec::new();
    };
    let Some(base) = Span::try_new(window.start.max(now), window.end) else {
        return Vec::new();
    };
    let blocked = merge_overlapping(&active_spans(existing, &base));
    subtract_intervals(&[base], &blocked)
}

/// Spans of active bookings overlapping `window`, clamped to it and sorted.
fn active_spans(existing: &[Booking], window: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = existing
        .iter()
        .filter(|b| b.is_active() && b.span.overlaps(window))
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // Tuesday
    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn schedule(open: NaiveTime, close: NaiveTime) -> FieldSchedule {
        FieldSchedule::uniform(
            Ulid::new(),
            None,
            Decimal::from(80),
            OperatingHours::new(open, close).unwrap(),
        )
    }

    fn at(cal: &Calendar, h: u32, m: u32) -> Ms {
        cal.instant(day(), t(h, m))
    }

    fn booking(cal: &Calendar, from: (u32, u32), to: (u32, u32), status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            field_id: Ulid::nil(),
            user_id: "player".into(),
            span: Span::new(at(cal, from.0, from.1), at(cal, to.0, to.1)),
            status,
            total_price: Decimal::ZERO,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn day_before(cal: &Calendar) -> Ms {
        at(cal, 0, 0) - DAY_MS
    }

    // ── derive_day_availability ───────────────────────────

    #[test]
    fn hourly_slots_cover_operating_window() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let avail = derive_day_availability(&s, &cal, day(), &[], 60, day_before(&cal)).unwrap();
        assert_eq!(avail.slots.len(), 14);
        assert_eq!(avail.slots[0].start, t(8, 0));
        assert_eq!(avail.slots[0].end, t(9, 0));
        assert_eq!(avail.slots[13].start, t(21, 0));
        assert_eq!(avail.slots[13].span.end, at(&cal, 22, 0));
        assert!(avail.slots.iter().all(|s| s.available && s.price == Decimal::from(80)));
        assert!(!avail.is_fully_booked);
    }

    #[test]
    fn trailing_partial_slot_dropped() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(10, 30));
        let avail = derive_day_availability(&s, &cal, day(), &[], 60, day_before(&cal)).unwrap();
        assert_eq!(avail.slots.len(), 2);
        assert_eq!(avail.slots[1].end, t(10, 0));

        let avail = derive_day_availability(&s, &cal, day(), &[], 30, day_before(&cal)).unwrap();
        assert_eq!(avail.slots.len(), 5);
        assert_eq!(avail.slots[0].price, Decimal::from(40));
    }

    #[test]
    fn booked_slots_marked() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let existing = [
            booking(&cal, (14, 0), (15, 0), BookingStatus::Confirmed),
            // straddles two slots
            booking(&cal, (16, 30), (17, 30), BookingStatus::Pending),
            booking(&cal, (10, 0), (11, 0), BookingStatus::Cancelled),
        ];
        let avail = derive_day_availability(&s, &cal, day(), &existing, 60, day_before(&cal)).unwrap();
        let booked: Vec<NaiveTime> = avail
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Booked)
            .map(|s| s.start)
            .collect();
        assert_eq!(booked, vec![t(14, 0), t(16, 0), t(17, 0)]);
        // back-to-back neighbours stay open
        let slot = |h| avail.slots.iter().find(|s| s.start == t(h, 0)).unwrap();
        assert!(slot(13).available);
        assert!(slot(15).available);
        // cancelled booking does not block
        assert!(slot(10).available);
    }

    #[test]
    fn past_slots_unavailable() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let now = at(&cal, 14, 30);
        let avail = derive_day_availability(&s, &cal, day(), &[], 60, now).unwrap();
        let slot = |h| avail.slots.iter().find(|s| s.start == t(h, 0)).unwrap();
        assert_eq!(slot(14).state, SlotState::Past);
        assert!(!slot(14).available);
        assert_eq!(slot(15).state, SlotState::Open);
        assert!(slot(15).available);
        assert!(avail.slots.iter().filter(|s| s.start < t(14, 0)).all(|s| !s.available));
    }

    #[test]
    fn past_takes_precedence_over_booked() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let existing = [booking(&cal, (9, 0), (10, 0), BookingStatus::Confirmed)];
        let avail = derive_day_availability(&s, &cal, day(), &existing, 60, at(&cal, 12, 0)).unwrap();
        assert_eq!(avail.slots[1].state, SlotState::Past);
    }

    #[test]
    fn whole_day_in_the_past() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let avail = derive_day_availability(&s, &cal, day(), &[], 60, at(&cal, 23, 0)).unwrap();
        assert!(avail.is_fully_booked);
    }

    #[test]
    fn fully_booked_day() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(12, 0));
        let existing = [
            booking(&cal, (8, 0), (10, 0), BookingStatus::Confirmed),
            booking(&cal, (10, 0), (11, 0), BookingStatus::Pending),
            booking(&cal, (11, 0), (12, 0), BookingStatus::Confirmed),
        ];
        let avail = derive_day_availability(&s, &cal, day(), &existing, 60, day_before(&cal)).unwrap();
        assert_eq!(avail.slots.len(), 4);
        assert!(avail.is_fully_booked);
    }

    #[test]
    fn closed_day_has_no_slots() {
        let cal = Calendar::default();
        let mut s = schedule(t(8, 0), t(22, 0));
        s.set_hours(Weekday::Tue, None);
        let avail = derive_day_availability(&s, &cal, day(), &[], 60, day_before(&cal)).unwrap();
        assert!(avail.slots.is_empty());
        assert!(avail.is_fully_booked);
    }

    #[test]
    fn derivation_is_deterministic() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let existing = [booking(&cal, (14, 0), (15, 0), BookingStatus::Confirmed)];
        let now = at(&cal, 9, 45);
        let a = derive_day_availability(&s, &cal, day(), &existing, 60, now).unwrap();
        let b = derive_day_availability(&s, &cal, day(), &existing, 60, now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bad_slot_size_rejected() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        assert!(derive_day_availability(&s, &cal, day(), &[], 0, 0).is_err());
        assert!(derive_day_availability(&s, &cal, day(), &[], MAX_SLOT_MINUTES + 1, 0).is_err());
    }

    // ── free_windows ──────────────────────────────────────

    #[test]
    fn free_windows_punch_out_bookings_and_past() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        let existing = [
            booking(&cal, (14, 0), (15, 0), BookingStatus::Confirmed),
            booking(&cal, (15, 0), (16, 0), BookingStatus::Pending),
            booking(&cal, (18, 0), (19, 0), BookingStatus::Cancelled),
        ];
        let free = free_windows(&s, &cal, day(), &existing, at(&cal, 10, 15));
        assert_eq!(
            free,
            vec![
                Span::new(at(&cal, 10, 15), at(&cal, 14, 0)),
                Span::new(at(&cal, 16, 0), at(&cal, 22, 0)),
            ]
        );
    }

    #[test]
    fn free_windows_empty_after_close() {
        let cal = Calendar::default();
        let s = schedule(t(8, 0), t(22, 0));
        assert!(free_windows(&s, &cal, day(), &[], at(&cal, 22, 0)).is_empty());
    }

    // ── interval arithmetic ───────────────────────────────

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]).is_empty());
    }

    #[test]
    fn subtract_multiple_punches() {
        let result = subtract_intervals(
            &[Span::new(0, 1000)],
            &[Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)],
        );
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn merge_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[
            Span::new(100, 200),
            Span::new(200, 300),
            Span::new(250, 400),
            Span::new(500, 600),
        ]);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }
}
