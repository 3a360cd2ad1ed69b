use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::placement::find_overlaps;

use super::validate::{check_in_service, check_room_free, validate_len, validate_nights};
use super::{Rack, RackError, RoomGuard, WalCommand};

impl Rack {
    pub async fn create_room(&self, room: Room) -> Result<(), RackError> {
        validate_len(&room.number, MAX_ROOM_NUMBER_LEN, "room number length")?;
        validate_len(&room.room_type, MAX_ROOM_TYPE_LEN, "room type length")?;
        if let Some(ref floor) = room.floor {
            validate_len(floor, MAX_FLOOR_LEN, "floor length")?;
        }

        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog.lock().await;
        if self.rooms.len() >= MAX_ROOMS_PER_PROPERTY {
            return Err(RackError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(RackError::AlreadyExists(room.id));
        }
        if self.room_numbers.contains_key(&room.number) {
            return Err(RackError::DuplicateRoomNumber(room.number));
        }

        let event = Event::RoomCreated {
            id: room.id,
            number: room.number.clone(),
            room_type: room.room_type.clone(),
            floor: room.floor.clone(),
            status: room.status,
        };
        self.wal_append(&event).await?;
        let id = room.id;
        self.room_numbers.insert(room.number.clone(), id);
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        debug!("room {id} created");
        Ok(())
    }

    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<(), RackError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(id).await?;
        let event = Event::RoomStatusChanged { id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("room {id} is now {}", status.as_str());
        Ok(())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), RackError> {
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog.lock().await;
        let guard = self.lock_room(id).await?;
        if guard.has_active_reservations() {
            return Err(RackError::HasReservations(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.room_numbers.remove(&guard.room.number);
        for r in &guard.reservations {
            self.reservation_to_room.remove(&r.id);
        }
        self.rooms.remove(&id);
        debug!("room {id} deleted");
        Ok(())
    }

    /// Record a new confirmed reservation, optionally already placed in a room.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        room_id: Option<Ulid>,
        guest_name: String,
        nights: Nights,
    ) -> Result<(), RackError> {
        validate_nights(&nights)?;
        validate_len(&guest_name, MAX_GUEST_NAME_LEN, "guest name length")?;
        if self.reservation_to_room.contains_key(&id) || self.unassigned.contains_key(&id) {
            return Err(RackError::AlreadyExists(id));
        }

        let event = Event::ReservationCreated {
            id,
            room_id,
            guest_name: guest_name.clone(),
            nights,
            status: ReservationStatus::Confirmed,
        };

        let _gate = self.commit_gate.read().await;
        let Some(room_id) = room_id else {
            let _unassigned = self.unassigned_lock.lock().await;
            if self.unassigned.contains_key(&id) {
                return Err(RackError::AlreadyExists(id));
            }
            if self.unassigned.len() >= MAX_UNASSIGNED_RESERVATIONS {
                return Err(RackError::LimitExceeded("too many unassigned reservations"));
            }
            self.wal_append(&event).await?;
            self.unassigned.insert(
                id,
                Reservation {
                    id,
                    room_id: None,
                    guest_name,
                    nights,
                    status: ReservationStatus::Confirmed,
                },
            );
            debug!("reservation {id} created unassigned");
            return Ok(());
        };

        let mut guard = self.lock_room(room_id).await?;
        if guard.reservations.iter().any(|r| r.id == id) {
            return Err(RackError::AlreadyExists(id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(RackError::LimitExceeded("too many reservations on room"));
        }
        check_in_service(&guard)?;
        check_room_free(&guard, id, &nights)?;
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("reservation {id} created in room {room_id}");
        Ok(())
    }

    /// Assign or move one reservation. The commit-side twin of the drop check:
    /// any overlap, immediate or future, rejects the move.
    pub async fn move_reservation(&self, id: Ulid, target_room_id: Ulid) -> Result<(), RackError> {
        self.apply_moves(vec![(id, target_room_id)]).await
    }

    /// Atomically apply several moves. All-or-nothing: the final arrangement
    /// must be conflict-free in every target room, counting reservations that
    /// leave a room in the same batch as gone. This is how a future conflict
    /// is acknowledged: by moving the conflicting reservation too.
    pub async fn apply_moves(&self, moves: Vec<(Ulid, Ulid)>) -> Result<(), RackError> {
        if moves.is_empty() {
            return Ok(());
        }
        if moves.len() > MAX_BATCH_SIZE {
            return Err(RackError::LimitExceeded("batch too large"));
        }

        let _gate = self.commit_gate.read().await;
        let mut seen = HashSet::new();
        let mut located = Vec::with_capacity(moves.len());
        for &(id, to) in &moves {
            if !seen.insert(id) {
                return Err(RackError::DuplicateMove(id));
            }
            let from = match self.room_for_reservation(&id) {
                Some(room_id) => Some(room_id),
                None if self.unassigned.contains_key(&id) => None,
                None => return Err(RackError::NotFound(id)),
            };
            if from == Some(to) {
                return Err(RackError::SameRoom(id));
            }
            located.push(Relocation { id, from, to });
        }

        // Lock every room involved in id order to avoid deadlocks.
        let mut room_ids: Vec<Ulid> = located
            .iter()
            .flat_map(|m| std::iter::once(m.to).chain(m.from))
            .collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards: Vec<RoomGuard> = Vec::with_capacity(room_ids.len());
        let mut slot: HashMap<Ulid, usize> = HashMap::new();
        for rid in &room_ids {
            slot.insert(*rid, guards.len());
            guards.push(self.lock_room(*rid).await?);
        }
        let _unassigned = if located.iter().any(|m| m.from.is_none()) {
            Some(self.unassigned_lock.lock().await)
        } else {
            None
        };

        // Phase 1: resolve each reservation under lock and validate.
        let mut moving: Vec<(Relocation, Reservation)> = Vec::with_capacity(located.len());
        for m in &located {
            let current = match m.from {
                Some(from) => guards[slot[&from]]
                    .reservations
                    .iter()
                    .find(|r| r.id == m.id)
                    .cloned(),
                None => self.unassigned.get(&m.id).map(|r| r.value().clone()),
            };
            let current = current.ok_or(RackError::Stale(m.id))?;
            if !current.is_active() {
                return Err(RackError::InvalidTransition {
                    id: m.id,
                    status: current.status,
                    action: "move",
                });
            }
            check_in_service(&guards[slot[&m.to]])?;
            moving.push((*m, current));
        }

        let leaving: HashSet<Ulid> = moving.iter().map(|(m, _)| m.id).collect();
        for (i, (m, reservation)) in moving.iter().enumerate() {
            let target = &guards[slot[&m.to]];
            let staying = target
                .overlapping(&reservation.nights)
                .filter(|r| r.is_active() && !leaving.contains(&r.id));
            let arriving = moving[..i]
                .iter()
                .filter(|(other, _)| other.to == m.to)
                .map(|(_, r)| r);
            let overlaps = find_overlaps(&reservation.nights, staying.chain(arriving));
            if !overlaps.is_empty() {
                let ids: Vec<Ulid> = overlaps.iter().map(|r| r.id).collect();
                warn!("move of {} into room {} rejected: overlaps {ids:?}", m.id, m.to);
                metrics::counter!(crate::observability::COMMITS_REJECTED_TOTAL, "reason" => "conflict")
                    .increment(1);
                return Err(RackError::Conflict(ids));
            }
        }

        // Phase 2: the whole batch is one WAL record, then applied in memory.
        let event = Event::ReservationsMoved {
            moves: moving.iter().map(|(m, _)| *m).collect(),
        };
        self.wal_append(&event).await?;
        for (m, _) in &moving {
            match m.from {
                Some(from) => {
                    guards[slot[&from]].remove_reservation(m.id);
                }
                None => {
                    self.unassigned.remove(&m.id);
                }
            }
        }
        for (m, mut reservation) in moving {
            reservation.room_id = Some(m.to);
            guards[slot[&m.to]].insert_reservation(reservation);
            self.reservation_to_room.insert(m.id, m.to);
            debug!("reservation {} moved {:?} -> {}", m.id, m.from, m.to);
        }

        Ok(())
    }

    /// Confirmed → checked in. The stay must include `today` and the room must
    /// be in service.
    pub async fn check_in(&self, id: Ulid, today: Day) -> Result<(), RackError> {
        let _gate = self.commit_gate.read().await;
        let room_id = self.resolve_placed(&id)?;
        let mut guard = self.lock_room(room_id).await.map_err(|_| RackError::Stale(id))?;
        let current = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RackError::Stale(id))?;
        if current.status != ReservationStatus::Confirmed {
            return Err(RackError::InvalidTransition {
                id,
                status: current.status,
                action: "check in",
            });
        }
        if !current.nights.contains_night(today) {
            return Err(RackError::OutsideStay { id, today });
        }
        check_in_service(&guard)?;

        let event = Event::ReservationStatusChanged {
            id,
            room_id: Some(room_id),
            status: ReservationStatus::CheckedIn,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id} checked in to room {}", guard.room.number);
        Ok(())
    }

    pub async fn check_out(&self, id: Ulid) -> Result<(), RackError> {
        let _gate = self.commit_gate.read().await;
        let room_id = self.resolve_placed(&id)?;
        let mut guard = self.lock_room(room_id).await.map_err(|_| RackError::Stale(id))?;
        let status = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or(RackError::Stale(id))?;
        if status != ReservationStatus::CheckedIn {
            return Err(RackError::InvalidTransition {
                id,
                status,
                action: "check out",
            });
        }

        let event = Event::ReservationStatusChanged {
            id,
            room_id: Some(room_id),
            status: ReservationStatus::CheckedOut,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id} checked out of room {}", guard.room.number);
        Ok(())
    }

    /// Confirmed → cancelled, placed or not. A cancelled stay frees its nights.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), RackError> {
        let event = |room_id| Event::ReservationStatusChanged {
            id,
            room_id,
            status: ReservationStatus::Cancelled,
        };
        let check = |status: ReservationStatus| {
            if status == ReservationStatus::Confirmed {
                Ok(())
            } else {
                Err(RackError::InvalidTransition {
                    id,
                    status,
                    action: "cancel",
                })
            }
        };

        let _gate = self.commit_gate.read().await;
        if let Ok(room_id) = self.resolve_placed(&id) {
            let mut guard = self.lock_room(room_id).await.map_err(|_| RackError::Stale(id))?;
            let status = guard
                .reservations
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.status)
                .ok_or(RackError::Stale(id))?;
            check(status)?;
            self.persist_and_apply(&mut guard, &event(Some(room_id))).await?;
        } else {
            let _unassigned = self.unassigned_lock.lock().await;
            let status = match self.unassigned.get(&id) {
                Some(r) => r.status,
                // Assigned by a move since we looked.
                None if self.reservation_to_room.contains_key(&id) => {
                    return Err(RackError::Stale(id));
                }
                None => return Err(RackError::NotFound(id)),
            };
            check(status)?;
            self.wal_append(&event(None)).await?;
            if let Some(mut r) = self.unassigned.get_mut(&id) {
                r.status = ReservationStatus::Cancelled;
            }
        }
        debug!("reservation {id} cancelled");
        Ok(())
    }

    /// Look up the room holding a placed reservation.
    fn resolve_placed(&self, id: &Ulid) -> Result<Ulid, RackError> {
        match self.room_for_reservation(id) {
            Some(room_id) => Ok(room_id),
            None if self.unassigned.contains_key(id) => Err(RackError::NotAssigned(*id)),
            None => Err(RackError::NotFound(*id)),
        }
    }

    /// Rewrite the WAL with the minimal events that recreate the current rack.
    pub async fn compact_wal(&self) -> Result<(), RackError> {
        // Held until the compacted file is in place.
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let room_locks: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_locks {
            let guard = rs.read().await;
            let room = &guard.room;
            events.push(Event::RoomCreated {
                id: room.id,
                number: room.number.clone(),
                room_type: room.room_type.clone(),
                floor: room.floor.clone(),
                status: room.status,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    room_id: Some(room.id),
                    guest_name: r.guest_name.clone(),
                    nights: r.nights,
                    status: r.status,
                });
            }
        }
        for entry in self.unassigned.iter() {
            let r = entry.value();
            events.push(Event::ReservationCreated {
                id: r.id,
                room_id: None,
                guest_name: r.guest_name.clone(),
                nights: r.nights,
                status: r.status,
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| RackError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RackError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| RackError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
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
