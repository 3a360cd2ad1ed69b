use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date. Times of day never enter the rack.
pub type Day = NaiveDate;

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_day(s: &str) -> Result<Day, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
}

/// Half-open night range `[start, end)`.
///
/// A stay from D to D+2 occupies nights D and D+1; `end` is the departure day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nights {
    pub start: Day,
    pub end: Day,
}

impl Nights {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Nights start must be before end");
        Self { start, end }
    }

    /// Checked constructor for boundary input.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn count(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Nights) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_night(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }
}

impl fmt::Display for Nights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Unrecognised status text at a boundary (SQL, JSON).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Clean,
    Dirty,
    Inspected,
    Maintenance,
    OutOfOrder,
}

impl RoomStatus {
    /// Out-of-service rooms never receive a reservation.
    pub fn is_out_of_service(self) -> bool {
        match self {
            RoomStatus::Maintenance | RoomStatus::OutOfOrder => true,
            RoomStatus::Clean | RoomStatus::Dirty | RoomStatus::Inspected => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Clean => "clean",
            RoomStatus::Dirty => "dirty",
            RoomStatus::Inspected => "inspected",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::OutOfOrder => "out_of_order",
        }
    }
}

impl FromStr for RoomStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clean" => Ok(RoomStatus::Clean),
            "dirty" => Ok(RoomStatus::Dirty),
            "inspected" => Ok(RoomStatus::Inspected),
            "maintenance" => Ok(RoomStatus::Maintenance),
            "out_of_order" => Ok(RoomStatus::OutOfOrder),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl ReservationStatus {
    /// Whether a reservation in this status holds its room's nights.
    pub fn occupies_room(self) -> bool {
        match self {
            ReservationStatus::Confirmed | ReservationStatus::CheckedIn => true,
            ReservationStatus::CheckedOut | ReservationStatus::Cancelled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "checked_in" => Ok(ReservationStatus::CheckedIn),
            "checked_out" => Ok(ReservationStatus::CheckedOut),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    /// Display label, unique within a property.
    pub number: String,
    #[serde(rename = "type")]
    pub room_type: String,
    pub floor: Option<String>,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Option<Ulid>,
    pub guest_name: String,
    pub nights: Nights,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.occupies_room()
    }

    /// The guest is already in the room on `today`.
    pub fn checked_in_as_of(&self, today: Day) -> bool {
        self.status == ReservationStatus::CheckedIn && self.nights.start <= today
    }
}

/// A room and the reservations placed on it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// All placed reservations (any status), sorted by `nights.start`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping sort order by `nights.start`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.nights.start, |r| r.nights.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn has_active_reservations(&self) -> bool {
        self.reservations.iter().any(Reservation::is_active)
    }

    /// Reservations whose nights intersect `query`, any status.
    /// Binary search skips everything arriving on or after `query.end`.
    pub fn overlapping(&self, query: &Nights) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.nights.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.nights.end > query.start)
    }
}

/// One reservation changing room. `from` is `None` for an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub id: Ulid,
    pub from: Option<Ulid>,
    pub to: Ulid,
}

/// WAL record. Flat, one variant per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        number: String,
        room_type: String,
        floor: Option<String>,
        status: RoomStatus,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    RoomDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        room_id: Option<Ulid>,
        guest_name: String,
        nights: Nights,
        status: ReservationStatus,
    },
    /// A whole move batch, committed as one record.
    ReservationsMoved {
        moves: Vec<Relocation>,
    },
    ReservationStatusChanged {
        id: Ulid,
        room_id: Option<Ulid>,
        status: ReservationStatus,
    },
}
