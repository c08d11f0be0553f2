mod writer;

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{EngineError, ensure_no_conflict};
use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use writer::{WalCommand, wal_writer_loop};

/// Persistence boundary consumed by the engine.
///
/// Implementations must make `insert_booking` authoritative: it fails with
/// `Conflict` whenever the new booking would overlap an active booking on the
/// same field, no matter what the caller checked beforehand.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// `NotFound` when the field does not exist or is inactive.
    async fn get_field_schedule(&self, field_id: Ulid) -> Result<FieldSchedule, EngineError>;

    /// Pending/Confirmed bookings of the field overlapping `window`, sorted by start.
    async fn find_active_bookings(&self, field_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError>;

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, EngineError>;

    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError>;

    /// Move a booking to `status`, enforcing the status state machine.
    async fn update_booking_status(&self, id: Ulid, status: BookingStatus, at: Ms) -> Result<Booking, EngineError>;

    async fn list_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError>;
}

/// One field's schedule and bookings. `bookings` is sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct FieldState {
    pub schedule: FieldSchedule,
    pub bookings: Vec<Booking>,
}

impl FieldState {
    fn new(schedule: FieldSchedule) -> Self {
        Self {
            schedule,
            bookings: Vec::new(),
        }
    }

    fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| (b.span.start, b.id) < (booking.span.start, booking.id));
        self.bookings.insert(pos, booking);
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings of any status whose span overlaps `window`.
    pub fn overlapping(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        let right = self.bookings.partition_point(|b| b.span.start < window.end);
        self.bookings[..right]
            .iter()
            .filter(move |b| b.span.end > window.start)
    }

    pub fn active_overlapping(&self, window: &Span) -> Vec<Booking> {
        self.overlapping(window).filter(|b| b.is_active()).cloned().collect()
    }
}

pub type SharedFieldState = Arc<RwLock<FieldState>>;

/// In-memory booking store made durable by a write-ahead log.
///
/// Every mutation takes the owning field's write lock, commits its event to
/// the log, then applies it. The overlap check in `insert_booking` runs under
/// that same lock, so two overlapping inserts on one field cannot both win.
pub struct WalStore {
    fields: DashMap<Ulid, SharedFieldState>,
    booking_to_field: DashMap<Ulid, Ulid>,
    user_bookings: DashMap<String, Vec<Ulid>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by mutations and exclusively by `compact`, so a snapshot
    /// never races an append it does not contain. Always taken before any
    /// field lock.
    compaction_gate: RwLock<()>,
    /// Single-writer lock on the log, released on drop.
    _writer_lock: File,
}

impl WalStore {
    /// Lock the log at `path`, replay it and start its writer task. Must be
    /// called inside a tokio runtime.
    ///
    /// Fails with `Storage` while another store, in this process or another,
    /// has the same log open.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let writer_lock = Wal::lock_exclusive(path).map_err(storage)?;
        let events = Wal::replay(path).map_err(storage)?;
        let wal = Wal::open(path).map_err(storage)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            fields: DashMap::new(),
            booking_to_field: DashMap::new(),
            user_bookings: DashMap::new(),
            wal_tx,
            compaction_gate: RwLock::new(()),
            _writer_lock: writer_lock,
        };
        for event in &events {
            store.replay_event(event);
        }
        info!(
            "opened {}: {} event(s), {} field(s), {} booking(s)",
            path.display(),
            events.len(),
            store.fields.len(),
            store.booking_to_field.len()
        );
        Ok(store)
    }

    // Sole owner during replay, so try_write never contends.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::FieldUpserted { schedule } => {
                if let Some(existing) = self.fields.get(&schedule.field_id) {
                    if let Ok(mut fs) = existing.try_write() {
                        fs.schedule = schedule.clone();
                    }
                    return;
                }
                self.fields.insert(
                    schedule.field_id,
                    Arc::new(RwLock::new(FieldState::new(schedule.clone()))),
                );
            }
            other => {
                let field_id = event_field_id(other);
                let Some(fs) = self.field(field_id) else {
                    warn!("replay: skipping event for unknown field {field_id}");
                    return;
                };
                match fs.try_write() {
                    Ok(mut guard) => self.apply(&mut guard, other),
                    Err(_) => warn!("replay: field {field_id} unexpectedly locked"),
                }
            }
        }
    }

    /// Apply an already-committed event. Caller holds the field's write lock.
    fn apply(&self, fs: &mut FieldState, event: &Event) {
        match event {
            Event::FieldUpserted { schedule } => fs.schedule = schedule.clone(),
            Event::FieldDeactivated { .. } => fs.schedule.active = false,
            Event::BookingPlaced { booking } => {
                self.booking_to_field.insert(booking.id, booking.field_id);
                self.user_bookings
                    .entry(booking.user_id.clone())
                    .or_default()
                    .push(booking.id);
                fs.insert(booking.clone());
            }
            Event::BookingStatusChanged { id, status, at, .. } => {
                if let Some(b) = fs.get_mut(*id) {
                    b.status = *status;
                    b.updated_at = *at;
                }
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("wal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("wal writer dropped response".into()))?
            .map_err(storage)
    }

    /// Log, then apply. Nothing is applied if the log write fails. Caller
    /// holds the compaction gate and the field's write lock.
    async fn persist_and_apply(&self, fs: &mut FieldState, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply(fs, &event);
        Ok(())
    }

    fn field(&self, id: Ulid) -> Option<SharedFieldState> {
        self.fields.get(&id).map(|e| e.value().clone())
    }

    async fn booking_field(&self, booking_id: Ulid) -> Result<SharedFieldState, EngineError> {
        let field_id = self
            .booking_to_field
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(booking_id))?;
        self.field(field_id).ok_or(EngineError::NotFound(field_id))
    }

    // ── Field management ─────────────────────────────────────

    /// Create a field or replace its schedule. Re-activates a deactivated field.
    pub async fn upsert_field(&self, schedule: FieldSchedule) -> Result<(), EngineError> {
        if schedule.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("field name too long"));
        }
        if schedule.price_per_hour.is_sign_negative() {
            return Err(EngineError::InvalidRequest("price per hour must not be negative".into()));
        }
        let schedule = FieldSchedule { active: true, ..schedule };
        let id = schedule.field_id;
        let _gate = self.compaction_gate.read().await;

        if let Some(fs) = self.field(id) {
            let mut guard = fs.write().await;
            self.persist_and_apply(&mut guard, Event::FieldUpserted { schedule }).await?;
            info!("field {id} updated");
            return Ok(());
        }

        if self.fields.len() >= MAX_FIELDS {
            return Err(EngineError::LimitExceeded("too many fields"));
        }
        let event = Event::FieldUpserted { schedule: schedule.clone() };
        self.wal_append(&event).await?;
        let fs = self
            .fields
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(FieldState::new(schedule.clone()))))
            .value()
            .clone();
        // A concurrent upsert of the same new id may have inserted first.
        fs.write().await.schedule = schedule;
        info!("field {id} created");
        Ok(())
    }

    /// Stop accepting bookings and availability queries for a field. Existing
    /// bookings are kept.
    pub async fn deactivate_field(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let fs = self.field(id).ok_or(EngineError::NotFound(id))?;
        let mut guard = fs.write().await;
        if !guard.schedule.active {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut guard, Event::FieldDeactivated { id }).await?;
        info!("field {id} deactivated");
        Ok(())
    }

    /// Active fields, ordered by id.
    pub async fn list_fields(&self) -> Vec<FieldSchedule> {
        let all: Vec<SharedFieldState> = self.fields.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(all.len());
        for fs in all {
            let guard = fs.read().await;
            if guard.schedule.active {
                out.push(guard.schedule.clone());
            }
        }
        out.sort_by_key(|s| s.field_id);
        out
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the log as one event per field and one per booking.
    pub async fn compact(&self) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut all: Vec<(Ulid, SharedFieldState)> =
            self.fields.iter().map(|e| (*e.key(), e.value().clone())).collect();
        all.sort_by_key(|(id, _)| *id);

        let mut events = Vec::new();
        for (_, fs) in all {
            let guard = fs.read().await;
            events.push(Event::FieldUpserted {
                schedule: guard.schedule.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingPlaced { booking: b.clone() }),
            );
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("wal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("wal writer dropped response".into()))?
            .map_err(storage)?;
        info!("wal compacted to {count} event(s)");
        Ok(count)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn event_field_id(event: &Event) -> Ulid {
    match event {
        Event::FieldUpserted { schedule } => schedule.field_id,
        Event::FieldDeactivated { id } => *id,
        Event::BookingPlaced { booking } => booking.field_id,
        Event::BookingStatusChanged { field_id, .. } => *field_id,
    }
}

fn storage(e: std::io::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

#[async_trait]
impl BookingRepository for WalStore {
    async fn get_field_schedule(&self, field_id: Ulid) -> Result<FieldSchedule, EngineError> {
        let fs = self.field(field_id).ok_or(EngineError::NotFound(field_id))?;
        let guard = fs.read().await;
        if !guard.schedule.active {
            return Err(EngineError::NotFound(field_id));
        }
        Ok(guard.schedule.clone())
    }

    async fn find_active_bookings(&self, field_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        let fs = self.field(field_id).ok_or(EngineError::NotFound(field_id))?;
        let guard = fs.read().await;
        Ok(guard.active_overlapping(&window))
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let fs = self
            .field(booking.field_id)
            .ok_or(EngineError::NotFound(booking.field_id))?;
        let mut guard = fs.write().await;
        if !guard.schedule.active {
            return Err(EngineError::NotFound(booking.field_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_FIELD {
            return Err(EngineError::LimitExceeded("too many bookings on field"));
        }
        if self.booking_to_field.contains_key(&booking.id) {
            return Err(EngineError::InvalidRequest(format!("booking {} already exists", booking.id)));
        }
        if booking.is_active() {
            let blocking = guard.active_overlapping(&booking.span);
            ensure_no_conflict(&booking.span, &blocking)?;
        }

        self.persist_and_apply(&mut guard, Event::BookingPlaced { booking: booking.clone() })
            .await?;
        Ok(booking)
    }

    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let fs = self.booking_field(id).await?;
        let guard = fs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    async fn update_booking_status(&self, id: Ulid, status: BookingStatus, at: Ms) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let fs = self.booking_field(id).await?;
        let mut guard = fs.write().await;
        let current = guard.get_mut(id).ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        let field_id = current.field_id;

        self.persist_and_apply(&mut guard, Event::BookingStatusChanged { id, field_id, status, at })
            .await?;
        guard.get_mut(id).map(|b| b.clone()).ok_or(EngineError::NotFound(id))
    }

    async fn list_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, EngineError> {
        let ids: Vec<Ulid> = self
            .user_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut by_field: Vec<(Ulid, HashSet<Ulid>)> = Vec::new();
        for id in ids {
            let Some(field_id) = self.booking_to_field.get(&id).map(|e| *e.value()) else {
                continue;
            };
            match by_field.iter_mut().find(|(f, _)| *f == field_id) {
                Some((_, set)) => {
                    set.insert(id);
                }
                None => by_field.push((field_id, HashSet::from([id]))),
            }
        }

        let mut out = Vec::new();
        for (field_id, wanted) in by_field {
            let Some(fs) = self.field(field_id) else { continue };
            let guard = fs.read().await;
            out.extend(guard.bookings.iter().filter(|b| wanted.contains(&b.id)).cloned());
        }
        Ok(out)
    }
}
