use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{CalendarDay, Reservation, Room, StayRange};

use super::BookingError;

// ── Calendar Materialization ─────────────────────────────────────

/// How a calendar row's nightly price is derived. Pluggable; the engine
/// takes whichever policy the caller hands it.
#[derive(Debug, Clone)]
pub enum PricingPolicy {
    /// Same listed rate for every room and night.
    FlatRate { nightly: Decimal },
    /// Occupied nights carry the reservation's amount spread evenly over
    /// its stay; free nights fall back to the listed rate.
    ProRata { fallback: Decimal },
}

impl PricingPolicy {
    pub fn price(&self, _room: &Room, _day: NaiveDate, occupant: Option<&Reservation>) -> Decimal {
        match self {
            PricingPolicy::FlatRate { nightly } => *nightly,
            PricingPolicy::ProRata { fallback } => match occupant {
                Some(r) if r.stay.nights() > 0 => {
                    (r.amount / Decimal::from(r.stay.nights())).round_dp(2)
                }
                _ => *fallback,
            },
        }
    }
}

/// Build the `(room, day) -> reservation` occupancy lookup by walking each
/// reservation's full `[checkin, checkout)`.
///
/// Two reservations claiming the same room night mean the overlap invariant
/// was breached upstream. That is fatal input — never pick a winner.
pub fn build_occupancy(
    reservations: &[Reservation],
) -> Result<HashMap<(Ulid, NaiveDate), &Reservation>, BookingError> {
    let mut occupancy: HashMap<(Ulid, NaiveDate), &Reservation> = HashMap::new();
    for r in reservations {
        for day in r.stay.days() {
            if let Some(prior) = occupancy.insert((r.room_id, day), r)
                && prior.id != r.id {
                    return Err(BookingError::DataIntegrity {
                        room_id: r.room_id,
                        day,
                        first: prior.id,
                        second: r.id,
                    });
                }
        }
    }
    Ok(occupancy)
}

/// Produce one `CalendarDay` per (day in window) × room: current occupancy
/// and price, `reservation = None` where the room is free.
///
/// Pure and idempotent — identical inputs yield deep-equal rows, so the
/// caller can replace by (venue, room, day) key on every run.
pub fn materialize(
    rooms: &[Room],
    reservations: &[Reservation],
    window: &StayRange,
    policy: &PricingPolicy,
) -> Result<Vec<CalendarDay>, BookingError> {
    let occupancy = build_occupancy(reservations)?;

    let mut days = Vec::with_capacity(window.nights().max(0) as usize * rooms.len());
    for day in window.days() {
        for room in rooms {
            let occupant = occupancy.get(&(room.id, day)).copied();
            days.push(CalendarDay {
                venue_id: room.venue_id,
                room_id: room.id,
                day,
                price: policy.price(room, day, occupant),
                reservation: occupant.map(|r| r.id),
            });
        }
    }
    Ok(days)
}
