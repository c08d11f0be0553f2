use std::time::Instant;

use chrono::Days;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::model::*;
use crate::observability::{
    BOOKING_CONFLICTS_TOTAL, BOOKING_REQUESTS_TOTAL, BOOKING_TRANSITIONS_TOTAL, REQUEST_DURATION_SECONDS,
    outcome_label,
};

use super::conflict::{check_conflict, ensure_no_conflict, validate_span};
use super::pricing::compute_price;
use super::request::{BookingRequest, RequestedBooking};
use super::{Engine, EngineError};

impl Engine {
    /// Validate, check, price and persist a new `Pending` booking.
    ///
    /// Conflicts are terminal for the request; nothing is retried.
    pub async fn request_booking(&self, request: &BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.place_booking(request).await;

        metrics::counter!(BOOKING_REQUESTS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => "request_booking")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(b) => info!(
                "booking {} placed on field {} for {} ({}, {})",
                b.id,
                b.field_id,
                b.user_id,
                self.calendar().display(b.span.start),
                b.total_price
            ),
            Err(EngineError::Conflict { conflicting, .. }) => {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                debug!("booking on field {} rejected: conflicts with {} booking(s)", request.field_id, conflicting.len());
            }
            Err(e) if e.is_client_error() => debug!("booking on field {} rejected: {e}", request.field_id),
            Err(e) => error!("booking on field {} failed: {e}", request.field_id),
        }
        result
    }

    async fn place_booking(&self, request: &BookingRequest) -> Result<Booking, EngineError> {
        let calendar = *self.calendar();
        let valid = request.validate(&calendar)?;
        let now = self.now();
        // Before validate_span: out-of-window dates are InvalidRange.
        check_policy(&self.settings().policy, &calendar, &valid, now)?;
        validate_span(&valid.span)?;

        let schedule = self.repo.get_field_schedule(valid.field_id).await?;
        // Prices and checks operating hours, so out-of-hours requests report
        // the valid hours instead of a conflict.
        let total_price = compute_price(&schedule, &calendar, &valid.span)?;

        let day = calendar.day_span(valid.date);
        let existing = self.repo.find_active_bookings(valid.field_id, day).await?;
        ensure_no_conflict(&valid.span, &existing)?;

        let booking = Booking {
            id: Ulid::new(),
            field_id: valid.field_id,
            user_id: valid.user_id,
            span: valid.span,
            status: BookingStatus::Pending,
            total_price,
            notes: valid.notes,
            created_at: now,
            updated_at: now,
        };
        match self.repo.insert_booking(booking).await {
            Err(EngineError::Conflict { .. }) => {
                // Lost a race after our read; describe what is there now.
                let latest = self.repo.find_active_bookings(valid.field_id, day).await?;
                Err(EngineError::Conflict {
                    requested: valid.span,
                    conflicting: check_conflict(&valid.span, &latest).conflicting_bookings,
                })
            }
            other => other,
        }
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Confirmed).await
    }

    /// Mark a confirmed booking as played. Only possible once it has ended.
    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.repo.get_booking(id).await?;
        if self.now() < booking.span.end {
            return Err(EngineError::InvalidRequest(format!(
                "booking {id} ends at {} and cannot be completed before then",
                self.calendar().display(booking.span.end)
            )));
        }
        self.transition(id, BookingStatus::Completed).await
    }

    /// Cancel a pending or confirmed booking and work out the refund owed.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<CancellationOutcome, EngineError> {
        let before = self.repo.get_booking(id).await?;
        let booking = self.transition(id, BookingStatus::Cancelled).await?;
        let refund = refund_for(&self.settings().policy, &before, booking.updated_at);
        info!("booking {id} refund {refund} of {}", before.total_price);
        Ok(CancellationOutcome { booking, refund })
    }

    async fn transition(&self, id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.repo.update_booking_status(id, to, self.now()).await;
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => to.as_str())
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => {
                metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "status" => to.as_str()).increment(1);
                info!("booking {id} -> {to}");
            }
            Err(e) if e.is_client_error() => debug!("booking {id} -> {to} rejected: {e}"),
            Err(e) => error!("booking {id} -> {to} failed: {e}"),
        }
        result
    }
}

/// Booking-window rules that need "now": duration bounds, minimum lead time
/// and the furthest bookable date.
pub(crate) fn check_policy(
    policy: &BookingPolicy,
    calendar: &crate::calendar::Calendar,
    requested: &RequestedBooking,
    now: Ms,
) -> Result<(), EngineError> {
    let duration = requested.span.duration_ms();
    if duration < policy.min_duration_ms() || duration > policy.max_duration_ms() {
        return Err(EngineError::InvalidRange(format!(
            "duration must be between {} and {} minutes",
            policy.min_duration_minutes, policy.max_duration_minutes
        )));
    }
    if requested.span.start < now {
        return Err(EngineError::InvalidRange("start is in the past".into()));
    }
    if requested.span.start < now + policy.min_lead_ms() {
        return Err(EngineError::InvalidRange(format!(
            "bookings must start at least {} minutes from now",
            policy.min_lead_minutes
        )));
    }
    if let Some(today) = calendar.local_date(now)
        && let Some(last) = today.checked_add_days(Days::new(policy.max_days_ahead as u64))
        && requested.date > last
    {
        return Err(EngineError::InvalidRange(format!(
            "bookings can be made at most {} days ahead (last bookable date {last})",
            policy.max_days_ahead
        )));
    }
    Ok(())
}

/// Refund owed when `booking` is cancelled at `at`: the full price up to the
/// free-cancellation cutoff, the late percentage until start, nothing after.
pub(crate) fn refund_for(policy: &BookingPolicy, booking: &Booking, at: Ms) -> Decimal {
    if at <= booking.span.start - policy.free_cancellation_ms() {
        booking.total_price
    } else if at < booking.span.start {
        (booking.total_price * Decimal::from(policy.late_refund_percent) / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    }
}
