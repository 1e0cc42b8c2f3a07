use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open stay interval `[checkin, checkout)` in hotel nights.
///
/// A checkout on day D does not conflict with a checkin on day D, so
/// back-to-back stays on the same room are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl StayRange {
    /// An unvalidated range — `checkin >= checkout` is representable and is
    /// rejected by the validator, not by construction.
    pub fn new(checkin: NaiveDate, checkout: NaiveDate) -> Self {
        Self { checkin, checkout }
    }

    pub fn nights(&self) -> i64 {
        (self.checkout - self.checkin).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.checkin < other.checkout && other.checkin < self.checkout
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.checkin <= day && day < self.checkout
    }

    /// Every occupied night, checkin included, checkout excluded.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let checkout = self.checkout;
        self.checkin.iter_days().take_while(move |d| *d < checkout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub street: String,
    pub city: String,
    pub zipcode: String,
    pub country: String,
}

impl Address {
    pub fn new(name: &str, street: &str, city: &str, zipcode: &str) -> Self {
        Self {
            name: name.into(),
            street: street.into(),
            city: city.into(),
            zipcode: zipcode.into(),
            country: "United States".into(),
        }
    }
}

/// A property containing bookable rooms — hotel, hospital, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Ulid,
    pub address: Address,
    /// IANA timezone name, e.g. "America/Los_Angeles". Stay dates are kept
    /// in venue-local days; the zone matters to whoever renders clock times.
    pub timezone: String,
    /// A disabled venue stops accepting new reservations.
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomType {
    #[default]
    Regular,
    Deluxe,
    Suite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub venue_id: Ulid,
    /// Unique within the venue.
    pub room_number: String,
    pub room_type: RoomType,
    pub room_desc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReservationState {
    #[default]
    Future,
    CheckedIn,
    CheckedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub stay: StayRange,
    pub amount: Decimal,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (venue, room, day) row of the derived availability calendar.
/// `reservation = None` means the room is free that night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub venue_id: Ulid,
    pub room_id: Ulid,
    pub day: NaiveDate,
    pub price: Decimal,
    pub reservation: Option<Ulid>,
}

/// A room plus every reservation currently booked on it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `stay.checkin`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping the checkin sort order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.stay.checkin, |r| r.stay.checkin)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose stay overlaps the query window.
    /// Binary search skips everything checking in at or after `query.checkout`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.checkin < query.checkout);
        let checkin = query.checkin;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.checkout > checkin)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueCreated {
        id: Ulid,
        address: Address,
        timezone: String,
        disabled: bool,
    },
    VenueUpdated {
        id: Ulid,
        address: Address,
        timezone: String,
        disabled: bool,
    },
    VenueDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        venue_id: Ulid,
        room_number: String,
        room_type: RoomType,
        room_desc: String,
    },
    RoomUpdated {
        id: Ulid,
        room_number: String,
        room_type: RoomType,
        room_desc: String,
    },
    RoomDeleted {
        id: Ulid,
    },
    GuestCreated {
        id: Ulid,
        address: Address,
    },
    GuestUpdated {
        id: Ulid,
        address: Address,
    },
    GuestDeleted {
        id: Ulid,
    },
    ReservationBooked {
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
        state: ReservationState,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
    /// Field update, possibly moving the reservation to another room.
    /// `state` and `created_at` are untouched and survive from the old copy.
    ReservationUpdated {
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
        updated_at: DateTime<Utc>,
    },
    ReservationStateChanged {
        id: Ulid,
        state: ReservationState,
        updated_at: DateTime<Utc>,
    },
    ReservationCancelled {
        id: Ulid,
    },
}
