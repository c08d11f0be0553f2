use std::path::PathBuf;

use tracing::warn;

use crate::calendar::{Calendar, DEFAULT_UTC_OFFSET_MINUTES};
use crate::limits::{MAX_SLOT_MINUTES, MIN_SLOT_MINUTES};
use crate::model::{HOUR_MS, MINUTE_MS, Ms};

/// Booking rules applied to incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    /// Minimum time between "now" and the start of a new booking.
    pub min_lead_minutes: u32,
    /// Latest local start date, counted in days from today's local date.
    pub max_days_ahead: u32,
    /// Cancelling at least this long before start refunds the full price.
    pub free_cancellation_hours: u32,
    /// Share of the price refunded for later cancellations made before start.
    pub late_refund_percent: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_duration_minutes: 60,
            max_duration_minutes: 480,
            min_lead_minutes: 120,
            max_days_ahead: 30,
            free_cancellation_hours: 24,
            late_refund_percent: 90,
        }
    }
}

impl BookingPolicy {
    /// No lead time, no horizon, any duration from one minute to a full day.
    pub fn permissive() -> Self {
        Self {
            min_duration_minutes: 1,
            max_duration_minutes: 24 * 60,
            min_lead_minutes: 0,
            max_days_ahead: u32::MAX,
            ..Self::default()
        }
    }

    pub fn min_duration_ms(&self) -> Ms {
        self.min_duration_minutes as Ms * MINUTE_MS
    }

    pub fn max_duration_ms(&self) -> Ms {
        self.max_duration_minutes as Ms * MINUTE_MS
    }

    pub fn min_lead_ms(&self) -> Ms {
        self.min_lead_minutes as Ms * MINUTE_MS
    }

    pub fn free_cancellation_ms(&self) -> Ms {
        self.free_cancellation_hours as Ms * HOUR_MS
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub calendar: Calendar,
    pub policy: BookingPolicy,
    pub slot_minutes: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            calendar: Calendar::default(),
            policy: BookingPolicy::default(),
            slot_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub utc_offset_minutes: i32,
    pub slot_minutes: u32,
    pub policy: BookingPolicy,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            slot_minutes: 60,
            policy: BookingPolicy::default(),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Read `PITCHBOOK_*` environment variables; unset or unparseable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<i64>().ok());
        let u32_or = |key: &str, default: u32| {
            parse(key)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        let mut utc_offset_minutes = parse("PITCHBOOK_UTC_OFFSET_MINUTES")
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(defaults.utc_offset_minutes);
        if Calendar::from_offset_minutes(utc_offset_minutes).is_none() {
            warn!("PITCHBOOK_UTC_OFFSET_MINUTES={utc_offset_minutes} out of range, using default");
            utc_offset_minutes = defaults.utc_offset_minutes;
        }

        let mut slot_minutes = u32_or("PITCHBOOK_SLOT_MINUTES", defaults.slot_minutes);
        if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&slot_minutes) {
            warn!(
                "PITCHBOOK_SLOT_MINUTES={slot_minutes} outside {MIN_SLOT_MINUTES}..={MAX_SLOT_MINUTES}, using default"
            );
            slot_minutes = defaults.slot_minutes;
        }

        let p = defaults.policy;
        let mut policy = BookingPolicy {
            min_duration_minutes: u32_or("PITCHBOOK_MIN_DURATION_MINUTES", p.min_duration_minutes),
            max_duration_minutes: u32_or("PITCHBOOK_MAX_DURATION_MINUTES", p.max_duration_minutes),
            min_lead_minutes: u32_or("PITCHBOOK_MIN_LEAD_MINUTES", p.min_lead_minutes),
            max_days_ahead: u32_or("PITCHBOOK_MAX_DAYS_AHEAD", p.max_days_ahead),
            free_cancellation_hours: u32_or("PITCHBOOK_FREE_CANCELLATION_HOURS", p.free_cancellation_hours),
            late_refund_percent: u32_or("PITCHBOOK_LATE_REFUND_PERCENT", p.late_refund_percent).min(100),
        };
        if policy.max_duration_minutes == 0 || policy.min_duration_minutes > policy.max_duration_minutes {
            warn!(
                "booking duration bounds {}..={} minutes admit nothing, using defaults",
                policy.min_duration_minutes, policy.max_duration_minutes
            );
            policy.min_duration_minutes = p.min_duration_minutes;
            policy.max_duration_minutes = p.max_duration_minutes;
        }

        Self {
            data_dir: lookup("PITCHBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            utc_offset_minutes,
            slot_minutes,
            policy,
            compact_threshold: parse("PITCHBOOK_COMPACT_THRESHOLD")
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse("PITCHBOOK_METRICS_PORT").and_then(|v| u16::try_from(v).ok()),
        }
    }

    pub fn calendar(&self) -> Calendar {
        Calendar::from_offset_minutes(self.utc_offset_minutes).unwrap_or_default()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            calendar: self.calendar(),
            policy: self.policy,
            slot_minutes: self.slot_minutes,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("pitchbook.wal")
    }
}
