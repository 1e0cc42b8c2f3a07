use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, BookingError, SharedRoomState};

impl Engine {
    // ── Venues & guests ──────────────────────────────────────

    pub fn get_venue(&self, id: &Ulid) -> Option<Venue> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn list_venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.venues.iter().map(|e| e.value().clone()).collect();
        venues.sort_by_key(|v| v.id);
        venues
    }

    pub fn get_guest(&self, id: &Ulid) -> Option<Guest> {
        self.guests.get(id).map(|e| e.value().clone())
    }

    pub fn list_guests(&self) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self.guests.iter().map(|e| e.value().clone()).collect();
        guests.sort_by_key(|g| g.id);
        guests
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn get_room_info(&self, id: &Ulid) -> Option<Room> {
        let rs = self.get_room(id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    /// List rooms, optionally narrowed by venue and/or room number — the
    /// same filters the room search endpoint exposes.
    pub async fn list_rooms(
        &self,
        venue_id: Option<Ulid>,
        room_number: Option<&str>,
    ) -> Vec<Room> {
        let states = self.room_states_for(venue_id);
        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if room_number.is_none_or(|n| n == guard.room.room_number) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let room_id = self.room_for_reservation(id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.get_reservation(*id).cloned()
    }

    pub async fn list_reservations(
        &self,
        venue_id: Option<Ulid>,
        room_id: Option<Ulid>,
    ) -> Vec<Reservation> {
        let states = match room_id {
            Some(rid) => self.get_room(&rid).into_iter().collect(),
            None => self.room_states_for(venue_id),
        };
        let mut reservations = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            if venue_id.is_none_or(|v| v == guard.room.venue_id) {
                reservations.extend(guard.reservations.iter().cloned());
            }
        }
        reservations.sort_by_key(|r| r.id);
        reservations
    }

    /// The store's filtered range query: every reservation on the room whose
    /// stay intersects the window.
    pub async fn find_overlapping(
        &self,
        room_id: Ulid,
        window: StayRange,
    ) -> Result<Vec<Reservation>, BookingError> {
        if window.nights() > MAX_CALENDAR_WINDOW_DAYS {
            return Err(BookingError::LimitExceeded("query window too wide"));
        }
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };
        let guard = rs.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    // ── Calendar ─────────────────────────────────────────────

    /// Materialized rows for the venue over the window, ordered by
    /// (day, room).
    pub async fn calendar_days(&self, venue_id: Ulid, window: StayRange) -> Vec<CalendarDay> {
        let cal = self.venue_calendar(venue_id);
        let guard = cal.lock().await;
        guard
            .range((window.checkin, Ulid::nil())..(window.checkout, Ulid::nil()))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// All rooms' rows for one day — the per-day availability listing.
    pub async fn calendar_day(&self, venue_id: Ulid, day: NaiveDate) -> Vec<CalendarDay> {
        match day.succ_opt() {
            Some(next) => {
                self.calendar_days(venue_id, StayRange::new(day, next))
                    .await
            }
            None => Vec::new(),
        }
    }

    fn room_states_for(&self, venue_id: Option<Ulid>) -> Vec<SharedRoomState> {
        match venue_id {
            Some(vid) => self
                .venue_rooms
                .get(&vid)
                .map(|e| e.value().clone())
                .unwrap_or_default()
                .iter()
                .filter_map(|rid| self.get_room(rid))
                .collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        }
    }
}
