use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum RackError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateRoomNumber(String),
    RoomOutOfService(Ulid),
    /// Reservation is already in the target room.
    SameRoom(Ulid),
    /// Active reservations already holding some of the requested nights.
    Conflict(Vec<Ulid>),
    /// Reservation moved between lookup and lock; caller should refetch.
    Stale(Ulid),
    DuplicateMove(Ulid),
    HasReservations(Ulid),
    NotAssigned(Ulid),
    InvalidTransition {
        id: Ulid,
        status: ReservationStatus,
        action: &'static str,
    },
    OutsideStay {
        id: Ulid,
        today: NaiveDate,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for RackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RackError::NotFound(id) => write!(f, "not found: {id}"),
            RackError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            RackError::DuplicateRoomNumber(n) => write!(f, "room number already in use: {n}"),
            RackError::RoomOutOfService(id) => write!(f, "room {id} is out of service"),
            RackError::SameRoom(id) => write!(f, "reservation {id} is already in that room"),
            RackError::Conflict(ids) => {
                let ids: Vec<String> = ids.iter().map(Ulid::to_string).collect();
                write!(f, "conflict with reservations: {}", ids.join(", "))
            }
            RackError::Stale(id) => {
                write!(f, "reservation {id} changed concurrently, refresh and retry")
            }
            RackError::DuplicateMove(id) => {
                write!(f, "reservation {id} appears more than once in the batch")
            }
            RackError::HasReservations(id) => {
                write!(f, "cannot delete room {id}: has active reservations")
            }
            RackError::NotAssigned(id) => write!(f, "reservation {id} has no room"),
            RackError::InvalidTransition { id, status, action } => write!(
                f,
                "cannot {action} reservation {id}: status is {}",
                status.as_str()
            ),
            RackError::OutsideStay { id, today } => {
                write!(f, "{today} is outside the stay of reservation {id}")
            }
            RackError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            RackError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for RackError {}
