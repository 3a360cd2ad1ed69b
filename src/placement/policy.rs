use serde::{Serialize, Serializer};
use ulid::Ulid;

use crate::model::{Day, Reservation, RoomStatus};

use super::overlap::{any_in_house, find_overlaps, occupants};
use super::Snapshot;

/// Outcome of dropping a reservation onto a room.
///
/// Built fresh per drag-over/drop event; never cache one across moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropDecision {
    /// No active reservation shares a night with the stay.
    Ok,
    /// Target is the room the reservation already occupies.
    Unchanged,
    /// Target room is under maintenance or out of order.
    Blocked,
    /// At least one overlapping guest is already checked in.
    Conflict(Vec<Reservation>),
    /// Overlaps exist but none of those guests has arrived yet.
    FutureConflict(Vec<Reservation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    Blocked,
    SameRoom,
    Conflict,
    FutureConflict,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Blocked => "BLOCKED",
            DropReason::SameRoom => "SAME_ROOM",
            DropReason::Conflict => "CONFLICT",
            DropReason::FutureConflict => "FUTURE_CONFLICT",
        }
    }
}

impl DropDecision {
    pub fn is_ok(&self) -> bool {
        matches!(self, DropDecision::Ok)
    }

    pub fn reason(&self) -> Option<DropReason> {
        match self {
            DropDecision::Ok => None,
            DropDecision::Unchanged => Some(DropReason::SameRoom),
            DropDecision::Blocked => Some(DropReason::Blocked),
            DropDecision::Conflict(_) => Some(DropReason::Conflict),
            DropDecision::FutureConflict(_) => Some(DropReason::FutureConflict),
        }
    }

    pub fn conflicts(&self) -> &[Reservation] {
        match self {
            DropDecision::Conflict(c) | DropDecision::FutureConflict(c) => c,
            DropDecision::Ok | DropDecision::Unchanged | DropDecision::Blocked => &[],
        }
    }

    /// Short label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            DropDecision::Ok => "ok",
            DropDecision::Unchanged => "unchanged",
            DropDecision::Blocked => "blocked",
            DropDecision::Conflict(_) => "conflict",
            DropDecision::FutureConflict(_) => "future_conflict",
        }
    }
}

fn no_conflicts(conflicts: &&[Reservation]) -> bool {
    conflicts.is_empty()
}

/// Wire shape `{ ok, reason?, conflicts? }`.
#[derive(Serialize)]
struct DecisionView<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DropReason>,
    #[serde(skip_serializing_if = "no_conflicts")]
    conflicts: &'a [Reservation],
}

impl Serialize for DropDecision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DecisionView {
            ok: self.is_ok(),
            reason: self.reason(),
            conflicts: self.conflicts(),
        }
        .serialize(serializer)
    }
}

/// Classify dropping `moving` onto `target_room_id` as of `today`.
///
/// Rules, first match wins: out-of-service target, same room, overlap with a
/// checked-in guest, overlap with future arrivals only, free.
///
/// The target must be in the snapshot. An unknown id is a caller bug: it
/// trips a debug assertion and otherwise degrades to [`DropDecision::Blocked`].
pub fn validate_drop(
    snapshot: &Snapshot,
    moving: &Reservation,
    target_room_id: Ulid,
    today: Day,
) -> DropDecision {
    let target = snapshot.room(target_room_id);
    debug_assert!(
        target.is_some(),
        "drop target {target_room_id} is not in the snapshot"
    );
    let Some(target) = target else {
        return DropDecision::Blocked;
    };

    match target.status {
        RoomStatus::Maintenance | RoomStatus::OutOfOrder => return DropDecision::Blocked,
        RoomStatus::Clean | RoomStatus::Dirty | RoomStatus::Inspected => {}
    }

    if moving.room_id == Some(target.id) {
        return DropDecision::Unchanged;
    }

    let overlaps = find_overlaps(&moving.nights, occupants(snapshot, target.id, moving));
    classify(&overlaps, today)
}

pub(crate) fn classify(overlaps: &[&Reservation], today: Day) -> DropDecision {
    if overlaps.is_empty() {
        return DropDecision::Ok;
    }
    let conflicts: Vec<Reservation> = overlaps.iter().map(|r| (*r).clone()).collect();
    if any_in_house(overlaps, today) {
        DropDecision::Conflict(conflicts)
    } else {
        DropDecision::FutureConflict(conflicts)
    }
}
