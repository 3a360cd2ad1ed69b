use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::placement::find_overlaps;

use super::RackError;

pub(crate) fn validate_nights(nights: &Nights) -> Result<(), RackError> {
    if nights.start >= nights.end {
        return Err(RackError::LimitExceeded("stay must cover at least one night"));
    }
    if nights.start < min_valid_date() || nights.end > max_valid_date() {
        return Err(RackError::LimitExceeded("date out of range"));
    }
    if nights.count() > MAX_STAY_NIGHTS {
        return Err(RackError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Nights) -> Result<(), RackError> {
    if window.start >= window.end {
        return Err(RackError::LimitExceeded("empty window"));
    }
    if window.count() > MAX_WINDOW_DAYS {
        return Err(RackError::LimitExceeded("window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_len(value: &str, max: usize, what: &'static str) -> Result<(), RackError> {
    if value.is_empty() || value.len() > max {
        return Err(RackError::LimitExceeded(what));
    }
    Ok(())
}

/// Reject placing `nights` in `rs` if any other active reservation holds one
/// of those nights. `reservation_id` is excluded so a stay never collides
/// with itself.
pub(crate) fn check_room_free(
    rs: &RoomState,
    reservation_id: Ulid,
    nights: &Nights,
) -> Result<(), RackError> {
    let occupants = rs
        .overlapping(nights)
        .filter(|r| r.id != reservation_id && r.is_active());
    let overlaps = find_overlaps(nights, occupants);
    if overlaps.is_empty() {
        Ok(())
    } else {
        Err(RackError::Conflict(overlaps.iter().map(|r| r.id).collect()))
    }
}

pub(crate) fn check_in_service(rs: &RoomState) -> Result<(), RackError> {
    if rs.room.status.is_out_of_service() {
        return Err(RackError::RoomOutOfService(rs.room.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    fn room_state(status: RoomStatus) -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            number: "101".into(),
            room_type: "Deluxe".into(),
            floor: None,
            status,
        })
    }

    fn place(rs: &mut RoomState, start: &str, end: &str, status: ReservationStatus) -> Ulid {
        let id = Ulid::new();
        rs.insert_reservation(Reservation {
            id,
            room_id: Some(rs.room.id),
            guest_name: "Guest".into(),
            nights: Nights::new(day(start), day(end)),
            status,
        });
        id
    }

    #[test]
    fn nights_limits() {
        assert!(validate_nights(&Nights::new(day("2025-08-13"), day("2025-08-15"))).is_ok());
        let reversed = Nights { start: day("2025-08-15"), end: day("2025-08-13") };
        assert!(matches!(validate_nights(&reversed), Err(RackError::LimitExceeded(_))));
        let ancient = Nights::new(day("1999-12-30"), day("2000-01-02"));
        assert!(matches!(validate_nights(&ancient), Err(RackError::LimitExceeded("date out of range"))));
        let endless = Nights::new(day("2025-01-01"), day("2027-01-01"));
        assert!(matches!(validate_nights(&endless), Err(RackError::LimitExceeded("stay too long"))));
    }

    #[test]
    fn window_limits() {
        assert!(validate_window(&Nights::new(day("2025-08-01"), day("2025-09-01"))).is_ok());
        let wide = Nights::new(day("2025-01-01"), day("2030-01-01"));
        assert!(matches!(validate_window(&wide), Err(RackError::LimitExceeded("window too wide"))));
    }

    #[test]
    fn len_limits() {
        assert!(validate_len("101", MAX_ROOM_NUMBER_LEN, "room number").is_ok());
        assert!(validate_len("", MAX_ROOM_NUMBER_LEN, "room number").is_err());
        let long = "x".repeat(MAX_ROOM_NUMBER_LEN + 1);
        assert!(validate_len(&long, MAX_ROOM_NUMBER_LEN, "room number").is_err());
    }

    #[test]
    fn room_free_reports_every_overlap() {
        let mut rs = room_state(RoomStatus::Clean);
        let a = place(&mut rs, "2025-08-10", "2025-08-13", ReservationStatus::CheckedIn);
        let b = place(&mut rs, "2025-08-13", "2025-08-15", ReservationStatus::Confirmed);
        place(&mut rs, "2025-08-12", "2025-08-14", ReservationStatus::Cancelled);
        place(&mut rs, "2025-08-15", "2025-08-16", ReservationStatus::Confirmed);

        let wanted = Nights::new(day("2025-08-12"), day("2025-08-15"));
        match check_room_free(&rs, Ulid::new(), &wanted) {
            Err(RackError::Conflict(ids)) => assert_eq!(ids, vec![a, b]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn room_free_ignores_self() {
        let mut rs = room_state(RoomStatus::Clean);
        let a = place(&mut rs, "2025-08-10", "2025-08-13", ReservationStatus::Confirmed);
        let nights = Nights::new(day("2025-08-10"), day("2025-08-13"));
        assert!(check_room_free(&rs, a, &nights).is_ok());
    }

    #[test]
    fn out_of_service_rooms_rejected() {
        assert!(check_in_service(&room_state(RoomStatus::Dirty)).is_ok());
        assert!(matches!(
            check_in_service(&room_state(RoomStatus::Maintenance)),
            Err(RackError::RoomOutOfService(_))
        ));
    }
}
