mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod request;

pub use availability::{derive_day_availability, free_windows, merge_overlapping, subtract_intervals};
pub use conflict::{check_conflict, overlaps};
pub(crate) use conflict::ensure_no_conflict;
pub use error::EngineError;
pub use pricing::{compute_price, price_for_duration};
pub use request::{BookingRequest, RequestedBooking};

use std::sync::Arc;

use crate::calendar::Calendar;
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::model::Ms;
use crate::store::BookingRepository;

/// Booking orchestration over a repository.
///
/// Holds no booking state of its own: every decision is made from what the
/// repository returns plus the injected clock, and the repository's insert has
/// the final word on conflicts.
pub struct Engine {
    repo: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(repo: Arc<dyn BookingRepository>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self { repo, clock, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn calendar(&self) -> &Calendar {
        &self.settings.calendar
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }
}
