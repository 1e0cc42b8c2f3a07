use chrono::Datelike;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{RoomState, StayRange};

use super::BookingError;

/// Reject malformed or out-of-bounds stay ranges before any overlap check.
pub fn validate_stay(stay: &StayRange) -> Result<(), BookingError> {
    if stay.checkin >= stay.checkout {
        return Err(BookingError::InvalidRange {
            checkin: stay.checkin,
            checkout: stay.checkout,
        });
    }
    if stay.checkin.year() < MIN_VALID_YEAR || stay.checkout.year() > MAX_VALID_YEAR {
        return Err(BookingError::LimitExceeded("stay date out of range"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(BookingError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Decide whether `candidate` may be committed on this room.
///
/// `exclude` carries the candidate's own id on update so an edit never
/// conflicts with itself. The caller holds the room's write lock, which
/// makes check-then-commit atomic with respect to other writers.
pub fn check_no_overlap(
    rs: &RoomState,
    candidate: &StayRange,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    for existing in rs.overlapping(candidate) {
        if Some(existing.id) == exclude {
            continue;
        }
        if existing.stay.overlaps(candidate) {
            return Err(BookingError::OverlapConflict(existing.id));
        }
    }
    Ok(())
}
