mod bookings;
mod conflict;
mod error;
mod queries;
mod rooms;
mod timeline;
mod transitions;

pub use error::{EngineError, ErrorKind};
pub use timeline::room_slots;
pub use transitions::{TickReport, Transition};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{BookingEvent, NotifyHub};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then pay
/// for a single fsync and answer every sender with its outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Compaction must observe the batch already on disk.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes do not leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// Booking ledger and room registry. Every room owns its bookings behind its
/// own lock; all writes are journaled before they are applied.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Serializes room creation/deletion against compaction.
    pub(super) registry: Mutex<()>,
}

/// Apply an event directly to a RoomState (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = rs.booking_mut(id) {
                b.status = *status;
            }
        }
        Event::BookingEnded { id, end_at, .. } => {
            if let Some(b) = rs.booking_mut(id) {
                b.end_at = *end_at;
                b.status = BookingStatus::Ended;
            }
        }
        Event::BookingExtended {
            id, end_at, slots, ..
        } => {
            if let Some(b) = rs.booking_mut(id) {
                b.end_at = *end_at;
                b.slots = *slots;
            }
        }
        // RoomCreated/Deleted are handled at the DashMap level, not here
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

/// Which lifecycle notice, if any, an applied event produces.
fn notice_for(event: &Event) -> Option<(Ulid, BookingEvent)> {
    match event {
        Event::BookingCreated { booking } => Some((booking.id, BookingEvent::Created)),
        Event::BookingStatusChanged { id, status, .. } => match status {
            BookingStatus::InProgress => Some((*id, BookingEvent::Started)),
            BookingStatus::Ended => Some((*id, BookingEvent::Ended)),
            BookingStatus::Cancelled => Some((*id, BookingEvent::Cancelled)),
            BookingStatus::Confirmed => None,
        },
        Event::BookingEnded { id, .. } => Some((*id, BookingEvent::Ended)),
        Event::BookingExtended { id, .. } => Some((*id, BookingEvent::Extended)),
        _ => None,
    }
}

/// Extract the room id from an event (for non-Create/Delete events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { room } => Some(room.id),
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::BookingStatusChanged { room_id, .. }
        | Event::BookingEnded { room_id, .. }
        | Event::BookingExtended { room_id, .. } => Some(*room_id),
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => None,
    }
}

impl Engine {
    /// Open the engine on the WAL at `wal_path`, replaying it into memory.
    /// Must be called from within a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            notify,
            booking_to_room: DashMap::new(),
            registry: Mutex::new(()),
        };

        // Sole owner of these Arcs during replay, so try_write always succeeds.
        // blocking_write would panic inside the runtime.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => {
                    engine.forget_room(id);
                }
                other => {
                    let Some(room_id) = event_room_id(other) else {
                        continue;
                    };
                    let Some(rs) = engine.get_room_state(&room_id) else {
                        continue;
                    };
                    if let Ok(mut guard) = rs.try_write() {
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }

        tracing::info!(
            rooms = engine.rooms.len(),
            bookings = engine.booking_to_room.len(),
            replayed = events.len(),
            "engine state restored"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Drop a room and the index entries of its bookings.
    fn forget_room(&self, id: &Ulid) {
        if let Some((_, rs)) = self.rooms.remove(id)
            && let Ok(guard) = rs.try_read()
        {
            for b in &guard.bookings {
                self.booking_to_room.remove(&b.id);
            }
        }
    }

    /// WAL-append + apply + notify in one call. Returns the affected booking
    /// as it stands after the event, if the event concerns one.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<Option<Booking>, EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        let Some((booking_id, notice)) = notice_for(event) else {
            return Ok(None);
        };
        let booking = rs.booking(&booking_id).cloned();
        if let Some(b) = &booking {
            self.notify.emit(notice, b);
        }
        Ok(booking)
    }

    /// Lock a room for writing, refusing rooms deleted in the meantime.
    pub(super) async fn room_write(
        &self,
        room_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(room_id)
            .ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(*room_id));
        }
        Ok(guard)
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let guard = self.room_write(&room_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::BookingNotFound(*booking_id));
        }
        Ok(guard)
    }

    /// Compact the WAL down to the events that recreate the current state.
    /// Every room stays read-locked until the snapshot has replaced the log,
    /// so no write can land in the old log after its room was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let handles: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in guards.iter().filter(|g| !g.deleted) {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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
