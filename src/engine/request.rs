use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::calendar::{Calendar, parse_date, parse_time};
use crate::limits::{MAX_NOTES_LEN, MAX_USER_ID_LEN};
use crate::model::Span;

use super::EngineError;

/// Inbound booking request as it arrives from a caller.
///
/// Unknown keys are rejected; every field is validated exactly once by
/// [`BookingRequest::validate`] into a [`RequestedBooking`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BookingRequest {
    pub field_id: Ulid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub user_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A structurally valid request, normalized to instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedBooking {
    pub field_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub user_id: String,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidRequest(e.to_string()))
    }

    pub fn validate(&self, calendar: &Calendar) -> Result<RequestedBooking, EngineError> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::InvalidRequest("user id is required".into()));
        }
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let date = parse_date(&self.date).ok_or_else(|| {
            EngineError::InvalidRange(format!("unparseable date {:?}, expected YYYY-MM-DD", self.date))
        })?;
        let start = parse_time(&self.start_time).ok_or_else(|| {
            EngineError::InvalidRange(format!("unparseable start time {:?}, expected HH:MM", self.start_time))
        })?;
        let end = parse_time(&self.end_time).ok_or_else(|| {
            EngineError::InvalidRange(format!("unparseable end time {:?}, expected HH:MM", self.end_time))
        })?;
        let span = calendar.window(date, start, end).ok_or_else(|| {
            EngineError::InvalidRange(format!(
                "start {} must be before end {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ))
        })?;

        Ok(RequestedBooking {
            field_id: self.field_id,
            date,
            span,
            user_id: user_id.to_string(),
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    fn request(date: &str, start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            field_id: Ulid::new(),
            date: date.into(),
            start_time: start.into(),
            end_time: end.into(),
            user_id: "user-42".into(),
            notes: None,
        }
    }

    #[test]
    fn valid_request_normalized() {
        let cal = Calendar::default();
        let req = request("2026-10-20", "15:00", "16:30");
        let valid = req.validate(&cal).unwrap();
        assert_eq!(valid.date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        assert_eq!(valid.span.duration_ms(), 90 * 60_000);
        assert_eq!(cal.display(valid.span.start), "2026-10-20 15:00");
    }

    #[test]
    fn start_must_precede_end() {
        let cal = Calendar::default();
        for (s, e) in [("16:00", "15:00"), ("15:00", "15:00")] {
            assert!(matches!(
                request("2026-10-20", s, e).validate(&cal),
                Err(EngineError::InvalidRange(_))
            ));
        }
    }

    #[test]
    fn unparseable_inputs_are_invalid_ranges() {
        let cal = Calendar::default();
        for req in [
            request("20-10-2026", "15:00", "16:00"),
            request("2026-10-20", "3pm", "16:00"),
            request("2026-10-20", "15:00", "24:00"),
        ] {
            assert!(matches!(req.validate(&cal), Err(EngineError::InvalidRange(_))), "{req:?}");
        }
    }

    #[test]
    fn user_and_notes_checked() {
        let cal = Calendar::default();
        let mut req = request("2026-10-20", "15:00", "16:00");
        req.user_id = "   ".into();
        assert!(matches!(req.validate(&cal), Err(EngineError::InvalidRequest(_))));

        let mut req = request("2026-10-20", "15:00", "16:00");
        req.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(req.validate(&cal), Err(EngineError::LimitExceeded(_))));

        let mut req = request("2026-10-20", "15:00", "16:00");
        req.notes = Some("  ".into());
        assert_eq!(req.validate(&cal).unwrap().notes, None);
    }

    #[test]
    fn json_contract_is_strict() {
        let id = Ulid::new();
        let ok = format!(
            r#"{{"fieldId":"{id}","date":"2026-10-20","startTime":"15:00","endTime":"16:00","userId":"u1","notes":"bring bibs"}}"#
        );
        let req = BookingRequest::from_json(&ok).unwrap();
        assert_eq!(req.field_id, id);
        assert_eq!(req.notes.as_deref(), Some("bring bibs"));

        let extra = format!(
            r#"{{"fieldId":"{id}","date":"2026-10-20","startTime":"15:00","endTime":"16:00","userId":"u1","price":0}}"#
        );
        assert!(matches!(BookingRequest::from_json(&extra), Err(EngineError::InvalidRequest(_))));

        let missing = format!(r#"{{"fieldId":"{id}","date":"2026-10-20","startTime":"15:00"}}"#);
        assert!(BookingRequest::from_json(&missing).is_err());
    }

    #[test]
    fn string_and_instant_ranges_agree() {
        let cal = Calendar::default();
        let valid = request("2026-10-20", "14:00", "15:00").validate(&cal).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let from_instants = cal
            .window(
                date,
                chrono::NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(valid.span, from_instants);
        assert_eq!(valid.span.duration_ms(), HOUR_MS);
    }
}
