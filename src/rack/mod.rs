//! Authoritative rack store for one property.
//!
//! Rooms live behind per-room `RwLock`s; every mutation is appended to the WAL
//! before it is applied. Moves re-run the placement overlap check while
//! holding the write locks of every room involved, so a stale client-side
//! check can never double-book a night.
//!
//! Lock order: `commit_gate`, then `catalog`, then room locks by id, then
//! `unassigned_lock`. Mutations hold the gate for reading from check to
//! apply; compaction holds it for writing, so no commit lands between the
//! compaction snapshot and the WAL swap.

mod error;
mod mutations;
mod queries;
mod validate;

pub use error::RackError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub(super) type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

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

/// Background task owning the WAL. Appends that arrive while a batch is being
/// gathered share one fsync; any other command flushes the batch first.
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
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; the whole batch is reported as failed.
    let flushed = wal.flush_sync();
    appended.and(flushed)
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Rack {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    /// Reservations waiting for a room, keyed by reservation id.
    pub(super) unassigned: DashMap<Ulid, Reservation>,
    /// Held from check to apply by every change to `unassigned`.
    pub(super) unassigned_lock: Mutex<()>,
    /// Placed reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    pub(super) room_numbers: DashMap<String, Ulid>,
    /// Serialises room creation/deletion so room numbers stay unique.
    pub(super) catalog: Mutex<()>,
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event scoped to one room. Caller holds that room's write lock.
/// Room creation/deletion and moves touch the maps and are handled by callers.
pub(super) fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomStatusChanged { status, .. } => rs.room.status = *status,
        Event::ReservationCreated {
            id,
            room_id: Some(room_id),
            guest_name,
            nights,
            status,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                room_id: Some(*room_id),
                guest_name: guest_name.clone(),
                nights: *nights,
                status: *status,
            });
            index.insert(*id, *room_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::ReservationCreated { room_id: None, .. }
        | Event::ReservationsMoved { .. } => {}
    }
}

impl Rack {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let rack = Self {
            rooms: DashMap::new(),
            unassigned: DashMap::new(),
            unassigned_lock: Mutex::new(()),
            reservation_to_room: DashMap::new(),
            room_numbers: DashMap::new(),
            catalog: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // We are the sole owner of every lock during replay, so try_write
        // always succeeds. Never block here: this can run inside the runtime
        // when a property is opened lazily.
        for event in &events {
            rack.replay(event);
        }
        tracing::debug!(
            "replayed {} events from {}: {} rooms",
            events.len(),
            wal_path.display(),
            rack.rooms.len()
        );

        Ok(rack)
    }

    fn replay(&self, event: &Event) {
        match event {
            Event::RoomCreated {
                id,
                number,
                room_type,
                floor,
                status,
            } => {
                let room = Room {
                    id: *id,
                    number: number.clone(),
                    room_type: room_type.clone(),
                    floor: floor.clone(),
                    status: *status,
                };
                self.rooms.insert(*id, Arc::new(RwLock::new(RoomState::new(room))));
                self.room_numbers.insert(number.clone(), *id);
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.room_numbers.remove(&guard.room.number);
                    for r in &guard.reservations {
                        self.reservation_to_room.remove(&r.id);
                    }
                }
            }
            Event::ReservationCreated {
                id,
                room_id: None,
                guest_name,
                nights,
                status,
            } => {
                self.unassigned.insert(
                    *id,
                    Reservation {
                        id: *id,
                        room_id: None,
                        guest_name: guest_name.clone(),
                        nights: *nights,
                        status: *status,
                    },
                );
            }
            Event::ReservationsMoved { moves } => {
                for m in moves {
                    let taken = match m.from {
                        Some(from) => self.get_room(&from).and_then(|rs| {
                            let mut guard = rs.try_write().expect("replay: uncontended write");
                            guard.remove_reservation(m.id)
                        }),
                        None => self.unassigned.remove(&m.id).map(|(_, r)| r),
                    };
                    if let (Some(mut reservation), Some(target)) = (taken, self.get_room(&m.to)) {
                        reservation.room_id = Some(m.to);
                        let mut guard = target.try_write().expect("replay: uncontended write");
                        guard.insert_reservation(reservation);
                        self.reservation_to_room.insert(m.id, m.to);
                    }
                }
            }
            Event::ReservationStatusChanged {
                id,
                room_id: None,
                status,
            } => {
                if let Some(mut r) = self.unassigned.get_mut(id) {
                    r.status = *status;
                }
            }
            other => {
                if let Some(room_id) = event_room_id(other)
                    && let Some(rs) = self.get_room(&room_id)
                {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, other, &self.reservation_to_room);
                }
            }
        }
    }

    /// Write an event through the group-commit writer and wait for fsync.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), RackError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| RackError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RackError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| RackError::WalError(e.to_string()))
    }

    /// WAL-append then apply a single-room event.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), RackError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        Ok(())
    }

    /// Write-lock a room. Fails with `NotFound` if the room was deleted while
    /// we waited for the lock.
    pub(super) async fn lock_room(&self, id: Ulid) -> Result<RoomGuard, RackError> {
        let rs = self.get_room(&id).ok_or(RackError::NotFound(id))?;
        let guard = rs.clone().write_owned().await;
        let live = self
            .rooms
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &rs));
        if !live {
            return Err(RackError::NotFound(id));
        }
        Ok(guard)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room
            .get(reservation_id)
            .map(|e| *e.value())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// Room an event applies to, for room-scoped events.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomStatusChanged { id, .. } => Some(*id),
        Event::ReservationCreated { room_id, .. } | Event::ReservationStatusChanged { room_id, .. } => {
            *room_id
        }
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } | Event::ReservationsMoved { .. } => {
            None
        }
    }
}
