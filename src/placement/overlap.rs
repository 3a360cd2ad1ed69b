use ulid::Ulid;

use crate::model::{Day, Nights, Reservation};

use super::Snapshot;

/// Reservations on `room_id` the moving reservation could collide with:
/// active ones other than the moving reservation itself.
pub fn occupants<'a>(
    snapshot: &'a Snapshot,
    room_id: Ulid,
    moving: &Reservation,
) -> impl Iterator<Item = &'a Reservation> + use<'a> {
    let moving_id = moving.id;
    snapshot
        .in_room(room_id)
        .filter(move |r| r.id != moving_id && r.is_active())
}

/// Occupants sharing at least one night with `nights`, in input order.
pub fn find_overlaps<'a, I>(nights: &Nights, occupants: I) -> Vec<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    occupants
        .into_iter()
        .filter(|r| r.nights.overlaps(nights))
        .collect()
}

/// True when any overlapping occupant is already in the room on `today`.
pub fn any_in_house(overlaps: &[&Reservation], today: Day) -> bool {
    overlaps.iter().any(|r| r.checked_in_as_of(today))
}
