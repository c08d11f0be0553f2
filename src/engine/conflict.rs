use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidRange("start must be before end".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Overlap test shared by every caller: `[s1, e1)` and `[s2, e2)` overlap iff
/// `s1 < e2 && e1 > s2`. Back-to-back ranges do not overlap.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// Every active booking in `existing` that overlaps `requested`.
///
/// Pure. Inactive bookings are ignored even if the caller passes them in, and
/// the result does not depend on `existing` being pre-filtered to a day.
pub fn check_conflict(requested: &Span, existing: &[Booking]) -> ConflictResult {
    let mut conflicting: Vec<Booking> = existing
        .iter()
        .filter(|b| b.is_active() && overlaps(&b.span, requested))
        .cloned()
        .collect();
    conflicting.sort_by_key(|b| (b.span.start, b.id));
    ConflictResult {
        has_conflict: !conflicting.is_empty(),
        conflicting_bookings: conflicting,
    }
}

/// `Err(Conflict)` carrying the blocking set, or `Ok` when `requested` is free.
pub(crate) fn ensure_no_conflict(requested: &Span, existing: &[Booking]) -> Result<(), EngineError> {
    let result = check_conflict(requested, existing);
    if result.has_conflict {
        return Err(EngineError::Conflict {
            requested: *requested,
            conflicting: result.conflicting_bookings,
        });
    }
    Ok(())
}
