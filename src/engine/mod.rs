mod calendar;
mod error;
mod mutations;
mod overlap;
mod queries;
#[cfg(test)]
mod tests;

pub use calendar::{build_occupancy, materialize, PricingPolicy};
pub use error::BookingError;
pub use overlap::{check_no_overlap, validate_stay};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// One venue's materialized calendar, keyed by (day, room). The mutex
/// serializes materializer runs per venue.
pub(super) type VenueCalendar = Arc<Mutex<BTreeMap<(NaiveDate, Ulid), CalendarDay>>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine: venues, rooms, guests, reservations, and the derived
/// calendar, durably backed by the WAL.
///
/// Every room's reservations live behind one `RwLock`, and validate-then-
/// commit for a reservation runs entirely under that room's write lock, so
/// two racing writers on the same room serialize instead of both passing the
/// overlap check.
pub struct Engine {
    pub venues: DashMap<Ulid, Venue>,
    pub guests: DashMap<Ulid, Guest>,
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Venue → rooms index for O(1) room listings.
    pub(super) venue_rooms: DashMap<Ulid, Vec<Ulid>>,
    /// (venue, room number) uniqueness index.
    pub(super) room_numbers: DashMap<(Ulid, String), Ulid>,
    /// Materialized calendar rows per venue.
    pub(super) calendar: DashMap<Ulid, VenueCalendar>,
}

/// Apply a reservation-scoped event to one room's state (no locking — the
/// caller holds the room's write lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, reservations: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationBooked {
            id,
            venue_id,
            room_id,
            guest_id,
            stay,
            amount,
            state,
            created_at,
            updated_at,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                venue_id: *venue_id,
                room_id: *room_id,
                guest_id: *guest_id,
                stay: *stay,
                amount: *amount,
                state: *state,
                created_at: *created_at,
                updated_at: *updated_at,
            });
            reservations.insert(*id, *room_id);
        }
        Event::ReservationUpdated {
            id,
            venue_id,
            room_id,
            guest_id,
            stay,
            amount,
            updated_at,
        } => {
            // Same-room update: remove + reinsert keeps the checkin sort order.
            if let Some(old) = rs.remove_reservation(*id) {
                rs.insert_reservation(Reservation {
                    id: *id,
                    venue_id: *venue_id,
                    room_id: *room_id,
                    guest_id: *guest_id,
                    stay: *stay,
                    amount: *amount,
                    state: old.state,
                    created_at: old.created_at,
                    updated_at: *updated_at,
                });
                reservations.insert(*id, *room_id);
            }
        }
        Event::ReservationStateChanged { id, state, updated_at } => {
            if let Some(r) = rs.get_reservation_mut(*id) {
                r.state = *state;
                r.updated_at = *updated_at;
            }
        }
        Event::ReservationCancelled { id } => {
            rs.remove_reservation(*id);
            reservations.remove(id);
        }
        Event::RoomUpdated {
            room_number,
            room_type,
            room_desc,
            ..
        } => {
            rs.room.room_number = room_number.clone();
            rs.room.room_type = *room_type;
            rs.room.room_desc = room_desc.clone();
        }
        // Entity-level events are handled at the map level, not here
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venues: DashMap::new(),
            guests: DashMap::new(),
            rooms: DashMap::new(),
            notify,
            wal_tx,
            reservation_to_room: DashMap::new(),
            venue_rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            calendar: DashMap::new(),
        };

        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    /// Apply one replayed event to the in-memory state. We are the sole
    /// owner of every room Arc during replay, so try_write always succeeds
    /// instantly; never use blocking_write here because replay may run
    /// inside an async context.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::VenueCreated {
                id,
                address,
                timezone,
                disabled,
            } => {
                self.venues.insert(
                    *id,
                    Venue {
                        id: *id,
                        address: address.clone(),
                        timezone: timezone.clone(),
                        disabled: *disabled,
                    },
                );
            }
            Event::VenueUpdated {
                id,
                address,
                timezone,
                disabled,
            } => {
                if let Some(mut venue) = self.venues.get_mut(id) {
                    venue.address = address.clone();
                    venue.timezone = timezone.clone();
                    venue.disabled = *disabled;
                }
            }
            Event::VenueDeleted { id } => {
                self.venues.remove(id);
                self.venue_rooms.remove(id);
                self.calendar.remove(id);
            }
            Event::RoomCreated {
                id,
                venue_id,
                room_number,
                room_type,
                room_desc,
            } => {
                let room = Room {
                    id: *id,
                    venue_id: *venue_id,
                    room_number: room_number.clone(),
                    room_type: *room_type,
                    room_desc: room_desc.clone(),
                };
                self.rooms.insert(*id, Arc::new(RwLock::new(RoomState::new(room))));
                self.venue_rooms.entry(*venue_id).or_default().push(*id);
                self.room_numbers.insert((*venue_id, room_number.clone()), *id);
            }
            Event::RoomUpdated { id, room_number, .. } => {
                if let Some(rs_arc) = self.get_room(id) {
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    let old_key = (guard.room.venue_id, guard.room.room_number.clone());
                    self.room_numbers.remove(&old_key);
                    self.room_numbers
                        .insert((guard.room.venue_id, room_number.clone()), *id);
                    apply_to_room(&mut guard, event, &self.reservation_to_room);
                }
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.room_numbers
                        .remove(&(guard.room.venue_id, guard.room.room_number.clone()));
                    if let Some(mut siblings) = self.venue_rooms.get_mut(&guard.room.venue_id) {
                        siblings.retain(|r| r != id);
                    }
                }
            }
            Event::GuestCreated { id, address } => {
                self.guests.insert(
                    *id,
                    Guest {
                        id: *id,
                        address: address.clone(),
                    },
                );
            }
            Event::GuestUpdated { id, address } => {
                if let Some(mut guest) = self.guests.get_mut(id) {
                    guest.address = address.clone();
                }
            }
            Event::GuestDeleted { id } => {
                self.guests.remove(id);
            }
            Event::ReservationBooked { room_id, .. } => {
                if let Some(rs_arc) = self.get_room(room_id) {
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, event, &self.reservation_to_room);
                }
            }
            Event::ReservationUpdated { id, room_id, .. } => {
                match self.room_for_reservation(id) {
                    Some(old) if old != *room_id => {
                        // Moved rooms: pull the old copy, reinsert in the new room.
                        let removed = self.get_room(&old).and_then(|old_arc| {
                            old_arc
                                .try_write()
                                .expect("replay: uncontended write")
                                .remove_reservation(*id)
                        });
                        if let Some(old_copy) = removed
                            && let Some(rs_arc) = self.get_room(room_id) {
                                let mut guard =
                                    rs_arc.try_write().expect("replay: uncontended write");
                                apply_moved_reservation(&mut guard, old_copy, event);
                                self.reservation_to_room.insert(*id, *room_id);
                            }
                    }
                    Some(_) => {
                        if let Some(rs_arc) = self.get_room(room_id) {
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_room(&mut guard, event, &self.reservation_to_room);
                        }
                    }
                    None => {}
                }
            }
            Event::ReservationStateChanged { id, .. } | Event::ReservationCancelled { id } => {
                if let Some(room_id) = self.room_for_reservation(id)
                    && let Some(rs_arc) = self.get_room(&room_id) {
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, event, &self.reservation_to_room);
                    }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call, for events scoped to a
    /// single room whose write lock the caller already holds.
    pub(super) async fn persist_and_apply(
        &self,
        venue_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        self.notify.send(venue_id, event);
        Ok(())
    }

    /// Lookup reservation → room, get the room, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), BookingError> {
        let room_id = self
            .room_for_reservation(reservation_id)
            .ok_or(BookingError::NotFound(*reservation_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(BookingError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    pub(super) fn venue_calendar(&self, venue_id: Ulid) -> VenueCalendar {
        self.calendar
            .entry(venue_id)
            .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())))
            .value()
            .clone()
    }
}

/// Insert a reservation that moved rooms, taking updated fields from the
/// event and keeping state/created_at from the old copy.
pub(super) fn apply_moved_reservation(rs: &mut RoomState, old: Reservation, event: &Event) {
    if let Event::ReservationUpdated {
        id,
        venue_id,
        room_id,
        guest_id,
        stay,
        amount,
        updated_at,
    } = event
    {
        rs.insert_reservation(Reservation {
            id: *id,
            venue_id: *venue_id,
            room_id: *room_id,
            guest_id: *guest_id,
            stay: *stay,
            amount: *amount,
            state: old.state,
            created_at: old.created_at,
            updated_at: *updated_at,
        });
    }
}
