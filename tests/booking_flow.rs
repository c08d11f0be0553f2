use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use pitchbook::calendar::Calendar;
use pitchbook::clock::FixedClock;
use pitchbook::config::{Config, EngineSettings};
use pitchbook::engine::{BookingRequest, Engine, EngineError, overlaps};
use pitchbook::model::*;
use pitchbook::store::{BookingRepository, WalStore};

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pitchbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

async fn open_engine(config: &Config, now: Ms) -> (Engine, Arc<WalStore>, Arc<FixedClock>) {
    let store = Arc::new(WalStore::open(&config.wal_path()).unwrap());
    let clock = Arc::new(FixedClock::new(now));
    let engine = Engine::new(store.clone(), clock.clone(), config.engine_settings());
    (engine, store, clock)
}

fn monday_morning() -> Ms {
    Calendar::default().instant(date("2026-10-19"), t(9, 0))
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn bookings_survive_restart() {
    let config = Config {
        data_dir: data_dir(),
        ..Config::default()
    };
    let field = FieldSchedule::uniform(
        Ulid::new(),
        Some("Stade Municipal".into()),
        Decimal::new(9500, 2),
        OperatingHours::new(t(8, 0), t(23, 0)).unwrap(),
    );
    let field_id = field.field_id;

    let booking = {
        let (engine, store, _) = open_engine(&config, monday_morning()).await;
        store.upsert_field(field.clone()).await.unwrap();
        let request = BookingRequest::from_json(&format!(
            r#"{{"fieldId":"{field_id}","date":"2026-10-21","startTime":"19:00","endTime":"20:30","userId":"amine","notes":"match amical"}}"#
        ))
        .unwrap();
        let booking = engine.request_booking(&request).await.unwrap();
        assert_eq!(booking.total_price, Decimal::new(14250, 2));
        engine.confirm_booking(booking.id).await.unwrap()
    };

    let (engine, store, _) = open_engine(&config, monday_morning()).await;
    assert_eq!(store.list_fields().await, vec![field]);
    assert_eq!(store.get_booking(booking.id).await.unwrap(), booking);

    let day = engine.get_day_availability(field_id, date("2026-10-21")).await.unwrap();
    let taken: Vec<(NaiveTime, SlotState)> = day
        .slots
        .iter()
        .filter(|s| !s.available)
        .map(|s| (s.start, s.state))
        .collect();
    assert_eq!(
        taken,
        vec![(t(19, 0), SlotState::Booked), (t(20, 0), SlotState::Booked)]
    );

    let err = engine
        .request_booking(&BookingRequest {
            field_id,
            date: "2026-10-21".into(),
            start_time: "20:00".into(),
            end_time: "21:00".into(),
            user_id: "yassine".into(),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    assert_eq!(
        err.user_message(engine.calendar()),
        "This time is already booked: 2026-10-21 19:00-20:30"
    );
}

#[tokio::test]
async fn one_writer_per_data_dir() {
    let config = Config {
        data_dir: data_dir(),
        ..Config::default()
    };
    let (engine, store, _) = open_engine(&config, monday_morning()).await;
    let field = FieldSchedule::uniform(
        Ulid::new(),
        None,
        Decimal::from(80),
        OperatingHours::new(t(8, 0), t(22, 0)).unwrap(),
    );
    let field_id = field.field_id;
    store.upsert_field(field).await.unwrap();

    let err = match WalStore::open(&config.wal_path()) {
        Err(e) => e,
        Ok(_) => panic!("second writer admitted"),
    };
    assert!(!err.is_client_error());

    let booking = engine
        .request_booking(&BookingRequest {
            field_id,
            date: "2026-10-20".into(),
            start_time: "10:00".into(),
            end_time: "11:00".into(),
            user_id: "u1".into(),
            notes: None,
        })
        .await
        .unwrap();
    store.compact().await.unwrap();
    drop(engine);
    drop(store);

    let (_, store, _) = open_engine(&config, monday_morning()).await;
    assert_eq!(store.get_booking(booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn closed_days_and_per_day_hours() {
    let config = Config {
        data_dir: data_dir(),
        ..Config::default()
    };
    let mut field = FieldSchedule::uniform(
        Ulid::new(),
        None,
        Decimal::from(60),
        OperatingHours::new(t(9, 0), t(21, 0)).unwrap(),
    );
    field.set_hours(Weekday::Sun, None);
    field.set_hours(Weekday::Sat, OperatingHours::new(t(7, 0), t(23, 0)));
    let field_id = field.field_id;

    let (engine, store, _) = open_engine(&config, monday_morning()).await;
    store.upsert_field(field).await.unwrap();

    let sunday = engine.get_day_availability(field_id, date("2026-10-25")).await.unwrap();
    assert!(sunday.slots.is_empty());
    assert!(sunday.is_fully_booked);

    let saturday = engine.get_day_availability(field_id, date("2026-10-24")).await.unwrap();
    assert_eq!(saturday.slots.len(), 16);
    assert_eq!(saturday.slots[0].start, t(7, 0));

    let err = engine
        .request_booking(&BookingRequest {
            field_id,
            date: "2026-10-25".into(),
            start_time: "10:00".into(),
            end_time: "11:00".into(),
            user_id: "u1".into(),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("closed on Sun"), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn no_double_booking_under_concurrency() {
    let config = Config {
        data_dir: data_dir(),
        ..Config::default()
    };
    let (engine, store, _) = open_engine(&config, monday_morning()).await;
    let engine = Arc::new(engine);
    let field = FieldSchedule::uniform(
        Ulid::new(),
        None,
        Decimal::from(80),
        OperatingHours::new(t(8, 0), t(22, 0)).unwrap(),
    );
    let field_id = field.field_id;
    store.upsert_field(field).await.unwrap();

    // Deterministic spread of 1-3 hour requests on 15-minute boundaries.
    let mut handles = Vec::new();
    for i in 0..120u32 {
        let engine = engine.clone();
        let start = 8 * 60 + (i * 37 % 48) * 15;
        let duration = 60 + (i % 3) * 60;
        if start + duration > 22 * 60 {
            continue;
        }
        handles.push(tokio::spawn(async move {
            engine
                .request_booking(&BookingRequest {
                    field_id,
                    date: "2026-10-22".into(),
                    start_time: hhmm(start),
                    end_time: hhmm(start + duration),
                    user_id: format!("player-{i}"),
                    notes: None,
                })
                .await
        }));
    }

    let mut placed = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => placed += 1,
            Err(EngineError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert!(placed > 0);

    let day = engine.calendar().day_span(date("2026-10-22"));
    let active = store.find_active_bookings(field_id, day).await.unwrap();
    assert_eq!(active.len(), placed);
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            assert!(!overlaps(&a.span, &b.span), "double booking: {a:?} / {b:?}");
        }
    }
}

#[tokio::test]
async fn custom_offset_and_slot_size() {
    let config = Config {
        data_dir: data_dir(),
        utc_offset_minutes: -300,
        slot_minutes: 90,
        ..Config::default()
    };
    let settings: EngineSettings = config.engine_settings();
    let now = settings.calendar.instant(date("2026-10-19"), t(9, 0));
    let (engine, store, clock) = open_engine(&config, now).await;
    let field = FieldSchedule::uniform(
        Ulid::new(),
        None,
        Decimal::from(40),
        OperatingHours::new(t(8, 0), t(22, 0)).unwrap(),
    );
    let field_id = field.field_id;
    store.upsert_field(field).await.unwrap();

    let day = engine.get_day_availability(field_id, date("2026-10-20")).await.unwrap();
    assert_eq!(day.slots.len(), 9);
    assert_eq!(day.slots[0].price, Decimal::from(60));
    assert_eq!(
        day.slots[0].span.start,
        settings.calendar.instant(date("2026-10-20"), t(8, 0))
    );
    // 08:00 at UTC-5 is 13:00 UTC
    assert_eq!(day.slots[0].span.start % 86_400_000, 13 * 3_600_000);

    clock.set(settings.calendar.instant(date("2026-10-20"), t(12, 0)));
    let day = engine.get_day_availability(field_id, date("2026-10-20")).await.unwrap();
    assert_eq!(day.slots.iter().filter(|s| s.state == SlotState::Past).count(), 3);
}
