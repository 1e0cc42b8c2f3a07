use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::calendar::{materialize, PricingPolicy};
use super::overlap::{check_no_overlap, validate_stay};
use super::{apply_moved_reservation, apply_to_room, Engine, BookingError, WalCommand};

fn validate_address(address: &Address) -> Result<(), BookingError> {
    if address.name.is_empty() {
        return Err(BookingError::LimitExceeded("name must not be empty"));
    }
    if address.name.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("name too long"));
    }
    if address.street.len() > MAX_FIELD_LEN
        || address.city.len() > MAX_FIELD_LEN
        || address.zipcode.len() > MAX_FIELD_LEN
        || address.country.len() > MAX_FIELD_LEN
    {
        return Err(BookingError::LimitExceeded("address field too long"));
    }
    Ok(())
}

fn validate_amount(amount: &Decimal) -> Result<(), BookingError> {
    if amount.is_sign_negative() {
        return Err(BookingError::LimitExceeded("amount must not be negative"));
    }
    Ok(())
}

impl Engine {
    // ── Venues ───────────────────────────────────────────────

    pub async fn create_venue(
        &self,
        id: Ulid,
        address: Address,
        timezone: String,
    ) -> Result<(), BookingError> {
        if self.venues.len() >= MAX_VENUES {
            return Err(BookingError::LimitExceeded("too many venues"));
        }
        validate_address(&address)?;
        if timezone.is_empty() {
            return Err(BookingError::LimitExceeded("timezone must not be empty"));
        }
        if timezone.len() > MAX_FIELD_LEN {
            return Err(BookingError::LimitExceeded("timezone too long"));
        }
        if self.venues.contains_key(&id) {
            return Err(BookingError::AlreadyExists(id));
        }

        let event = Event::VenueCreated {
            id,
            address: address.clone(),
            timezone: timezone.clone(),
            disabled: false,
        };
        self.wal_append(&event).await?;
        self.venues.insert(
            id,
            Venue {
                id,
                address,
                timezone,
                disabled: false,
            },
        );
        metrics::gauge!(observability::VENUES_ACTIVE).set(self.venues.len() as f64);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_venue(
        &self,
        id: Ulid,
        address: Address,
        timezone: String,
        disabled: bool,
    ) -> Result<(), BookingError> {
        validate_address(&address)?;
        if timezone.is_empty() {
            return Err(BookingError::LimitExceeded("timezone must not be empty"));
        }
        if timezone.len() > MAX_FIELD_LEN {
            return Err(BookingError::LimitExceeded("timezone too long"));
        }
        if !self.venues.contains_key(&id) {
            return Err(BookingError::NotFound(id));
        }

        let event = Event::VenueUpdated {
            id,
            address: address.clone(),
            timezone: timezone.clone(),
            disabled,
        };
        self.wal_append(&event).await?;
        if let Some(mut venue) = self.venues.get_mut(&id) {
            venue.address = address;
            venue.timezone = timezone;
            venue.disabled = disabled;
        }
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn delete_venue(&self, id: Ulid) -> Result<(), BookingError> {
        if !self.venues.contains_key(&id) {
            return Err(BookingError::NotFound(id));
        }
        if let Some(rooms) = self.venue_rooms.get(&id)
            && !rooms.is_empty() {
                return Err(BookingError::HasRooms(id));
            }

        let event = Event::VenueDeleted { id };
        self.wal_append(&event).await?;
        self.venues.remove(&id);
        self.venue_rooms.remove(&id);
        self.calendar.remove(&id);
        metrics::gauge!(observability::VENUES_ACTIVE).set(self.venues.len() as f64);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        venue_id: Ulid,
        room_number: String,
        room_type: RoomType,
        room_desc: String,
    ) -> Result<(), BookingError> {
        if room_number.is_empty() {
            return Err(BookingError::LimitExceeded("room number must not be empty"));
        }
        if room_number.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("room number too long"));
        }
        if room_desc.len() > MAX_DESC_LEN {
            return Err(BookingError::LimitExceeded("room description too long"));
        }
        if !self.venues.contains_key(&venue_id) {
            return Err(BookingError::NotFound(venue_id));
        }
        if self
            .venue_rooms
            .get(&venue_id)
            .is_some_and(|rooms| rooms.len() >= MAX_ROOMS_PER_VENUE)
        {
            return Err(BookingError::LimitExceeded("too many rooms on venue"));
        }
        if self.rooms.contains_key(&id) {
            return Err(BookingError::AlreadyExists(id));
        }
        if self.room_numbers.contains_key(&(venue_id, room_number.clone())) {
            return Err(BookingError::DuplicateRoomNumber { venue_id, room_number });
        }

        let event = Event::RoomCreated {
            id,
            venue_id,
            room_number: room_number.clone(),
            room_type,
            room_desc: room_desc.clone(),
        };
        self.wal_append(&event).await?;
        let room = Room {
            id,
            venue_id,
            room_number: room_number.clone(),
            room_type,
            room_desc,
        };
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        self.venue_rooms.entry(venue_id).or_default().push(id);
        self.room_numbers.insert((venue_id, room_number), id);
        self.notify.send(venue_id, &event);
        Ok(())
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        room_number: String,
        room_type: RoomType,
        room_desc: String,
    ) -> Result<(), BookingError> {
        if room_number.is_empty() {
            return Err(BookingError::LimitExceeded("room number must not be empty"));
        }
        if room_number.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("room number too long"));
        }
        if room_desc.len() > MAX_DESC_LEN {
            return Err(BookingError::LimitExceeded("room description too long"));
        }
        let rs = self.get_room(&id).ok_or(BookingError::NotFound(id))?;
        let mut guard = rs.write().await;
        let venue_id = guard.room.venue_id;
        if room_number != guard.room.room_number
            && self.room_numbers.contains_key(&(venue_id, room_number.clone()))
        {
            return Err(BookingError::DuplicateRoomNumber { venue_id, room_number });
        }

        let event = Event::RoomUpdated {
            id,
            room_number: room_number.clone(),
            room_type,
            room_desc,
        };
        self.wal_append(&event).await?;
        self.room_numbers
            .remove(&(venue_id, guard.room.room_number.clone()));
        self.room_numbers.insert((venue_id, room_number), id);
        apply_to_room(&mut guard, &event, &self.reservation_to_room);
        self.notify.send(venue_id, &event);
        Ok(())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), BookingError> {
        let rs = self.get_room(&id).ok_or(BookingError::NotFound(id))?;
        // Hold the write lock through removal so no booking can slip into a
        // room that is going away.
        let guard = rs.write().await;
        if !guard.reservations.is_empty() {
            return Err(BookingError::HasReservations(id));
        }
        let venue_id = guard.room.venue_id;
        let room_number = guard.room.room_number.clone();

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        self.room_numbers.remove(&(venue_id, room_number));
        if let Some(mut siblings) = self.venue_rooms.get_mut(&venue_id) {
            siblings.retain(|r| r != &id);
        }
        self.notify.send(venue_id, &event);
        Ok(())
    }

    // ── Guests ───────────────────────────────────────────────

    pub async fn create_guest(&self, id: Ulid, address: Address) -> Result<(), BookingError> {
        validate_address(&address)?;
        if self.guests.contains_key(&id) {
            return Err(BookingError::AlreadyExists(id));
        }
        let event = Event::GuestCreated {
            id,
            address: address.clone(),
        };
        self.wal_append(&event).await?;
        self.guests.insert(id, Guest { id, address });
        Ok(())
    }

    pub async fn update_guest(&self, id: Ulid, address: Address) -> Result<(), BookingError> {
        validate_address(&address)?;
        if !self.guests.contains_key(&id) {
            return Err(BookingError::NotFound(id));
        }
        let event = Event::GuestUpdated {
            id,
            address: address.clone(),
        };
        self.wal_append(&event).await?;
        if let Some(mut guest) = self.guests.get_mut(&id) {
            guest.address = address;
        }
        Ok(())
    }

    pub async fn delete_guest(&self, id: Ulid) -> Result<(), BookingError> {
        if !self.guests.contains_key(&id) {
            return Err(BookingError::NotFound(id));
        }
        let room_states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_states {
            let guard = rs.read().await;
            if guard.reservations.iter().any(|r| r.guest_id == id) {
                return Err(BookingError::HasReservations(id));
            }
        }

        let event = Event::GuestDeleted { id };
        self.wal_append(&event).await?;
        self.guests.remove(&id);
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Validate and commit a new reservation. The overlap check and the
    /// insert run under the room's write lock, so two racing requests for
    /// the same room serialize and the loser sees the winner's booking.
    pub async fn book_reservation(
        &self,
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
    ) -> Result<(), BookingError> {
        let result = self
            .try_book(id, venue_id, room_id, guest_id, stay, amount)
            .await;
        record_booking(&result);
        result
    }

    async fn try_book(
        &self,
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
    ) -> Result<(), BookingError> {
        validate_stay(&stay)?;
        validate_amount(&amount)?;
        {
            let venue = self
                .venues
                .get(&venue_id)
                .ok_or(BookingError::NotFound(venue_id))?;
            if venue.disabled {
                return Err(BookingError::VenueDisabled(venue_id));
            }
        }
        if !self.guests.contains_key(&guest_id) {
            return Err(BookingError::NotFound(guest_id));
        }
        if self.reservation_to_room.contains_key(&id) {
            return Err(BookingError::AlreadyExists(id));
        }

        let rs = self.get_room(&room_id).ok_or(BookingError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !self.rooms.contains_key(&room_id) {
            return Err(BookingError::NotFound(room_id));
        }
        if guard.room.venue_id != venue_id {
            return Err(BookingError::VenueMismatch { room_id, venue_id });
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many reservations on room"));
        }

        check_no_overlap(&guard, &stay, None)?;

        let now = Utc::now();
        let event = Event::ReservationBooked {
            id,
            venue_id,
            room_id,
            guest_id,
            stay,
            amount,
            state: ReservationState::Future,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(venue_id, &mut guard, &event).await
    }

    /// Re-validate and commit changed fields, excluding the reservation's
    /// own nights from the overlap check. A changed room id moves the
    /// reservation; both room locks are taken in sorted order.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
    ) -> Result<(), BookingError> {
        let result = self
            .try_update(id, venue_id, room_id, guest_id, stay, amount)
            .await;
        record_booking(&result);
        result
    }

    async fn try_update(
        &self,
        id: Ulid,
        venue_id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
        stay: StayRange,
        amount: Decimal,
    ) -> Result<(), BookingError> {
        validate_stay(&stay)?;
        validate_amount(&amount)?;
        let old_room_id = self
            .room_for_reservation(&id)
            .ok_or(BookingError::NotFound(id))?;
        if !self.venues.contains_key(&venue_id) {
            return Err(BookingError::NotFound(venue_id));
        }
        if !self.guests.contains_key(&guest_id) {
            return Err(BookingError::NotFound(guest_id));
        }

        let event = Event::ReservationUpdated {
            id,
            venue_id,
            room_id,
            guest_id,
            stay,
            amount,
            updated_at: Utc::now(),
        };

        if room_id == old_room_id {
            let rs = self.get_room(&room_id).ok_or(BookingError::NotFound(room_id))?;
            let mut guard = rs.write().await;
            if guard.room.venue_id != venue_id {
                return Err(BookingError::VenueMismatch { room_id, venue_id });
            }
            check_no_overlap(&guard, &stay, Some(id))?;
            return self.persist_and_apply(venue_id, &mut guard, &event).await;
        }

        // Moving rooms: acquire both write locks in sorted id order to
        // prevent deadlocks against a move in the other direction.
        let old_rs = self
            .get_room(&old_room_id)
            .ok_or(BookingError::NotFound(old_room_id))?;
        let new_rs = self.get_room(&room_id).ok_or(BookingError::NotFound(room_id))?;
        let (mut old_guard, mut new_guard) = if old_room_id < room_id {
            let og = old_rs.write_owned().await;
            let ng = new_rs.write_owned().await;
            (og, ng)
        } else {
            let ng = new_rs.write_owned().await;
            let og = old_rs.write_owned().await;
            (og, ng)
        };

        if new_guard.room.venue_id != venue_id {
            return Err(BookingError::VenueMismatch { room_id, venue_id });
        }
        if new_guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many reservations on room"));
        }
        check_no_overlap(&new_guard, &stay, None)?;
        let old_copy = old_guard
            .get_reservation(id)
            .cloned()
            .ok_or(BookingError::NotFound(id))?;

        self.wal_append(&event).await?;
        old_guard.remove_reservation(id);
        apply_moved_reservation(&mut new_guard, old_copy, &event);
        self.reservation_to_room.insert(id, room_id);
        self.notify.send(venue_id, &event);
        Ok(())
    }

    pub async fn check_in(&self, id: Ulid) -> Result<(), BookingError> {
        self.transition(id, ReservationState::CheckedIn).await
    }

    pub async fn check_out(&self, id: Ulid) -> Result<(), BookingError> {
        self.transition(id, ReservationState::CheckedOut).await
    }

    async fn transition(&self, id: Ulid, to: ReservationState) -> Result<(), BookingError> {
        let (_room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let from = guard
            .get_reservation(id)
            .ok_or(BookingError::NotFound(id))?
            .state;
        let allowed = matches!(
            (from, to),
            (ReservationState::Future, ReservationState::CheckedIn)
                | (ReservationState::CheckedIn, ReservationState::CheckedOut)
        );
        if !allowed {
            return Err(BookingError::InvalidTransition { from, to });
        }

        let venue_id = guard.room.venue_id;
        let event = Event::ReservationStateChanged {
            id,
            state: to,
            updated_at: Utc::now(),
        };
        self.persist_and_apply(venue_id, &mut guard, &event).await
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), BookingError> {
        let (_room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let venue_id = guard.room.venue_id;
        let event = Event::ReservationCancelled { id };
        self.persist_and_apply(venue_id, &mut guard, &event).await
    }

    // ── Calendar ─────────────────────────────────────────────

    /// Rebuild the venue's calendar rows over `window` and return them.
    ///
    /// Replace-by-key: the window's old rows are dropped and the fresh set
    /// inserted, so rerunning with identical inputs is a no-op. Runs for the
    /// same venue serialize on the venue's calendar mutex.
    pub async fn materialize_calendar(
        &self,
        venue_id: Ulid,
        window: StayRange,
        policy: &PricingPolicy,
    ) -> Result<Vec<CalendarDay>, BookingError> {
        if window.checkin >= window.checkout {
            return Err(BookingError::InvalidRange {
                checkin: window.checkin,
                checkout: window.checkout,
            });
        }
        if window.nights() > MAX_CALENDAR_WINDOW_DAYS {
            return Err(BookingError::LimitExceeded("calendar window too wide"));
        }
        if !self.venues.contains_key(&venue_id) {
            return Err(BookingError::NotFound(venue_id));
        }

        let cal = self.venue_calendar(venue_id);
        let mut cal_guard = cal.lock().await;

        // Snapshot the venue's rooms and every reservation touching the window.
        let mut room_ids = self
            .venue_rooms
            .get(&venue_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        room_ids.sort();
        let mut rooms = Vec::with_capacity(room_ids.len());
        let mut reservations = Vec::new();
        for rid in &room_ids {
            let Some(rs) = self.get_room(rid) else { continue };
            let guard = rs.read().await;
            rooms.push(guard.room.clone());
            reservations.extend(guard.overlapping(&window).cloned());
        }

        let started = std::time::Instant::now();
        let days = match materialize(&rooms, &reservations, &window, policy) {
            Ok(days) => days,
            Err(e) => {
                tracing::error!("calendar materialization aborted for venue {venue_id}: {e}");
                metrics::counter!(observability::CALENDAR_INTEGRITY_FAILURES_TOTAL).increment(1);
                return Err(e);
            }
        };

        cal_guard.retain(|(day, _), _| !window.contains_day(*day));
        for row in &days {
            cal_guard.insert((row.day, row.room_id), row.clone());
        }

        metrics::histogram!(observability::CALENDAR_REFRESH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(observability::CALENDAR_ROWS_MATERIALIZED_TOTAL)
            .increment(days.len() as u64);
        Ok(days)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        let mut events = Vec::new();
        for venue in self.venues.iter() {
            events.push(Event::VenueCreated {
                id: venue.id,
                address: venue.address.clone(),
                timezone: venue.timezone.clone(),
                disabled: venue.disabled,
            });
        }
        for guest in self.guests.iter() {
            events.push(Event::GuestCreated {
                id: guest.id,
                address: guest.address.clone(),
            });
        }

        let room_states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut booked = Vec::new();
        for rs in room_states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                venue_id: guard.room.venue_id,
                room_number: guard.room.room_number.clone(),
                room_type: guard.room.room_type,
                room_desc: guard.room.room_desc.clone(),
            });
            for r in &guard.reservations {
                booked.push(Event::ReservationBooked {
                    id: r.id,
                    venue_id: r.venue_id,
                    room_id: r.room_id,
                    guest_id: r.guest_id,
                    stay: r.stay,
                    amount: r.amount,
                    state: r.state,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                });
            }
        }
        events.extend(booked);

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn record_booking(result: &Result<(), BookingError>) {
    match result {
        Ok(()) => {
            metrics::counter!(observability::BOOKINGS_TOTAL, "status" => "ok").increment(1);
        }
        Err(e) => {
            metrics::counter!(observability::BOOKINGS_TOTAL, "status" => "rejected").increment(1);
            if matches!(e, BookingError::OverlapConflict(_)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
        }
    }
}
