use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationState;

#[derive(Debug)]
pub enum BookingError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// checkin at or after checkout — an empty-night stay is invalid.
    InvalidRange {
        checkin: NaiveDate,
        checkout: NaiveDate,
    },
    /// The room already holds a reservation intersecting the candidate range.
    OverlapConflict(Ulid),
    /// The room does not belong to the venue named by the reservation.
    VenueMismatch {
        room_id: Ulid,
        venue_id: Ulid,
    },
    /// The venue is not accepting reservations.
    VenueDisabled(Ulid),
    DuplicateRoomNumber {
        venue_id: Ulid,
        room_number: String,
    },
    HasRooms(Ulid),
    HasReservations(Ulid),
    InvalidTransition {
        from: ReservationState,
        to: ReservationState,
    },
    /// Two reservations claim the same room night — an invariant breach
    /// upstream, fatal for the materialization run that found it.
    DataIntegrity {
        room_id: Ulid,
        day: NaiveDate,
        first: Ulid,
        second: Ulid,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            BookingError::InvalidRange { checkin, checkout } => {
                write!(f, "invalid range: checkin {checkin} not before checkout {checkout}")
            }
            BookingError::OverlapConflict(id) => {
                write!(f, "room already booked: conflicts with reservation {id}")
            }
            BookingError::VenueMismatch { room_id, venue_id } => {
                write!(f, "room {room_id} does not belong to venue {venue_id}")
            }
            BookingError::VenueDisabled(id) => {
                write!(f, "venue {id} is not accepting reservations")
            }
            BookingError::DuplicateRoomNumber { venue_id, room_number } => {
                write!(f, "venue {venue_id} already has a room {room_number}")
            }
            BookingError::HasRooms(id) => {
                write!(f, "cannot delete venue {id}: has rooms")
            }
            BookingError::HasReservations(id) => {
                write!(f, "cannot delete {id}: has reservations")
            }
            BookingError::InvalidTransition { from, to } => {
                write!(f, "invalid state transition: {from:?} -> {to:?}")
            }
            BookingError::DataIntegrity { room_id, day, first, second } => {
                write!(
                    f,
                    "data integrity violation: reservations {first} and {second} both claim room {room_id} on {day}"
                )
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}
