use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Reservation, Room};

/// Read model of the rack for a visible date window.
///
/// Order matters: rooms and reservations are kept in the order the caller
/// fetched them, and every result derived from a snapshot preserves it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub rooms: Vec<Room>,
    pub reservations: Vec<Reservation>,
}

impl Snapshot {
    pub fn new(rooms: Vec<Room>, reservations: Vec<Reservation>) -> Self {
        Self { rooms, reservations }
    }

    pub fn room(&self, id: Ulid) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    /// Reservations placed on `room_id`, any status.
    pub fn in_room(&self, room_id: Ulid) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(move |r| r.room_id == Some(room_id))
    }
}
