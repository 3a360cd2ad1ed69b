use std::collections::HashSet;

use ulid::Ulid;

use crate::model::{Reservation, Room};

use super::Snapshot;

/// Rooms that could take the whole stay instead of `original`.
///
/// Candidates share the original room's type, are in service and hold no
/// active reservation on any of the stay's nights. Same-floor rooms come
/// first; snapshot order is kept inside each group. Returns every candidate,
/// possibly none; callers truncate for display.
pub fn suggest_alternatives<'a>(
    snapshot: &'a Snapshot,
    moving: &Reservation,
    original: &Room,
) -> Vec<&'a Room> {
    let occupied: HashSet<Ulid> = snapshot
        .reservations
        .iter()
        .filter(|r| r.id != moving.id && r.is_active() && r.nights.overlaps(&moving.nights))
        .filter_map(|r| r.room_id)
        .collect();

    let (same_floor, elsewhere): (Vec<&Room>, Vec<&Room>) = snapshot
        .rooms
        .iter()
        .filter(|room| room.id != original.id && Some(room.id) != moving.room_id)
        .filter(|room| room.room_type == original.room_type)
        .filter(|room| !room.status.is_out_of_service())
        .filter(|room| !occupied.contains(&room.id))
        .partition(|room| original.floor.is_some() && room.floor == original.floor);

    same_floor.into_iter().chain(elsewhere).collect()
}
