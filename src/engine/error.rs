use chrono::DateTime;
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Ms, Span};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or logically invalid time range; always caller-correctable.
    InvalidRange(String),
    /// The requested range overlaps active bookings.
    Conflict {
        requested: Span,
        conflicting: Vec<Booking>,
    },
    NotFound(Ulid),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidRequest(String),
    LimitExceeded(&'static str),
    /// Opaque infrastructure failure, propagated unchanged.
    Storage(String),
}

fn utc(t: Ms) -> String {
    DateTime::from_timestamp_millis(t)
        .map(|dt| dt.format("%Y-%m-%dT%H:%MZ").to_string())
        .unwrap_or_else(|| t.to_string())
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(reason) => write!(f, "invalid range: {reason}"),
            EngineError::Conflict { requested, conflicting } => {
                write!(
                    f,
                    "[{}, {}) conflicts with {} booking(s)",
                    utc(requested.start),
                    utc(requested.end),
                    conflicting.len()
                )?;
                for (i, b) in conflicting.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { ", " };
                    write!(f, "{sep}{} [{}, {})", b.id, utc(b.span.start), utc(b.span.end))?;
                }
                Ok(())
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot go from {from} to {to}")
            }
            EngineError::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Caller-correctable errors (the 4xx family).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }

    /// Message safe to show an end user. Infrastructure failures carry no detail.
    pub fn user_message(&self, calendar: &crate::calendar::Calendar) -> String {
        match self {
            EngineError::Conflict { conflicting, .. } if !conflicting.is_empty() => {
                let slots: Vec<String> = conflicting
                    .iter()
                    .map(|b| {
                        format!(
                            "{}-{}",
                            calendar.display(b.span.start),
                            calendar
                                .local_time(b.span.end)
                                .map(|t| t.format("%H:%M").to_string())
                                .unwrap_or_default()
                        )
                    })
                    .collect();
                format!("This time is already booked: {}", slots.join(", "))
            }
            EngineError::Conflict { .. } => "This time is already booked".to_string(),
            EngineError::Storage(_) => "Something went wrong, please try again later".to_string(),
            other => other.to_string(),
        }
    }
}
