use rust_decimal::{Decimal, RoundingStrategy};

use crate::calendar::Calendar;
use crate::model::*;

use super::EngineError;

/// Operating window covering `span`'s local date, or why there is none.
pub(crate) fn operating_window(
    schedule: &FieldSchedule,
    calendar: &Calendar,
    span: &Span,
) -> Result<Span, EngineError> {
    let date = calendar
        .local_date(span.start)
        .ok_or_else(|| EngineError::InvalidRange("start is not a representable instant".into()))?;
    let weekday = calendar.weekday(date);
    let hours = schedule
        .hours_on(weekday)
        .ok_or_else(|| EngineError::InvalidRange(format!("field is closed on {weekday}")))?;
    let window = calendar
        .window(date, hours.open, hours.close)
        .ok_or_else(|| EngineError::InvalidRange(format!("invalid operating hours {hours}")))?;
    if !window.contains_span(span) {
        return Err(EngineError::InvalidRange(format!(
            "outside operating hours {hours} on {weekday}"
        )));
    }
    Ok(window)
}

/// Linear price for `duration_ms`, rounded half-up to 2 decimal places.
pub fn price_for_duration(price_per_hour: Decimal, duration_ms: Ms) -> Decimal {
    (price_per_hour * Decimal::from(duration_ms) / Decimal::from(HOUR_MS))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `price_per_hour × hours(requested)`; fractional hours are not truncated.
///
/// Fails with `InvalidRange` when the range is empty or falls outside the
/// field's operating hours for that day of week.
pub fn compute_price(
    schedule: &FieldSchedule,
    calendar: &Calendar,
    requested: &Span,
) -> Result<Decimal, EngineError> {
    if requested.duration_ms() <= 0 {
        return Err(EngineError::InvalidRange("duration must be positive".into()));
    }
    operating_window(schedule, calendar, requested)?;
    Ok(price_for_duration(schedule.price_per_hour, requested.duration_ms()))
}
