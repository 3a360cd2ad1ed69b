use std::cmp::Ordering;

use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::placement::{suggest_alternatives, validate_drop, DropDecision, Snapshot};

use super::validate::validate_window;
use super::{Rack, RackError};

/// Rack order for room numbers: shorter labels first, so "99" sorts before
/// "101", then lexically.
pub fn rack_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Rack {
    /// Every room, in rack order.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let locks: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(locks.len());
        for rs in locks {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| rack_order(&a.number, &b.number).then(a.id.cmp(&b.id)));
        rooms
    }

    /// Read model of the rack. With a window, only reservations holding one
    /// of its nights are included; rooms are always all listed.
    ///
    /// Order: rooms in rack order; reservations grouped by room in that same
    /// order and by arrival within a room, then unassigned ones by arrival.
    pub async fn snapshot(&self, window: Option<Nights>) -> Result<Snapshot, RackError> {
        if let Some(ref w) = window {
            validate_window(w)?;
        }
        let locks: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut states = Vec::with_capacity(locks.len());
        for rs in locks {
            let guard = rs.read().await;
            let placed: Vec<Reservation> = match window {
                Some(ref w) => guard.overlapping(w).cloned().collect(),
                None => guard.reservations.clone(),
            };
            states.push((guard.room.clone(), placed));
        }
        states.sort_by(|(a, _), (b, _)| rack_order(&a.number, &b.number).then(a.id.cmp(&b.id)));

        let mut rooms = Vec::with_capacity(states.len());
        let mut reservations = Vec::new();
        for (room, placed) in states {
            rooms.push(room);
            reservations.extend(placed);
        }

        let mut waiting: Vec<Reservation> = self
            .unassigned
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| window.is_none_or(|w| r.nights.overlaps(&w)))
            .collect();
        waiting.sort_by_key(|r| (r.nights.start, r.id));
        reservations.extend(waiting);

        Ok(Snapshot::new(rooms, reservations))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, RackError> {
        if let Some(room_id) = self.room_for_reservation(&id) {
            let rs = self.get_room(&room_id).ok_or(RackError::NotFound(id))?;
            let guard = rs.read().await;
            return guard
                .reservations
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(RackError::NotFound(id));
        }
        self.unassigned
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(RackError::NotFound(id))
    }

    /// Run the drop check against the current rack.
    ///
    /// Only the stay's own nights matter, so the snapshot is windowed to them.
    /// An unknown target room is reported as `NotFound` rather than degrading
    /// to a blocked decision.
    pub async fn check_drop(
        &self,
        reservation_id: Ulid,
        room_id: Ulid,
        today: Day,
    ) -> Result<DropDecision, RackError> {
        let moving = self.get_reservation(reservation_id).await?;
        let snapshot = self.snapshot(Some(moving.nights)).await?;
        // The room may be deleted between lookup and snapshot.
        if snapshot.room(room_id).is_none() {
            return Err(RackError::NotFound(room_id));
        }
        let decision = validate_drop(&snapshot, &moving, room_id, today);

        metrics::counter!(crate::observability::DROP_DECISIONS_TOTAL, "outcome" => decision.outcome())
            .increment(1);
        debug!(
            "drop of {reservation_id} on {room_id} as of {today}: {}",
            decision.outcome()
        );
        Ok(decision)
    }

    /// Rooms that could take the stay instead of `room_id`, same floor first.
    /// Unbounded; callers truncate.
    pub async fn alternatives(
        &self,
        reservation_id: Ulid,
        room_id: Ulid,
    ) -> Result<Vec<Room>, RackError> {
        let moving = self.get_reservation(reservation_id).await?;
        let original = {
            let rs = self.get_room(&room_id).ok_or(RackError::NotFound(room_id))?;
            rs.read().await.room.clone()
        };
        let snapshot = self.snapshot(Some(moving.nights)).await?;
        Ok(suggest_alternatives(&snapshot, &moving, &original)
            .into_iter()
            .cloned()
            .collect())
    }
}
