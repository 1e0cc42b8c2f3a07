use super::overlap::{check_no_overlap, validate_stay};
use super::*;
use crate::notify::NotifyHub;

use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Day 0 of every test scenario; `day(n)` counts forward from here.
fn day(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap() + Days::new(n)
}

fn stay(from: u64, to: u64) -> StayRange {
    StayRange::new(day(from), day(to))
}

fn usd(whole: i64) -> Decimal {
    Decimal::new(whole * 100, 2)
}

fn addr(name: &str) -> Address {
    Address::new(name, "1 Lane", "Los Angeles", "90000")
}

fn test_room(venue_id: Ulid, number: &str) -> Room {
    Room {
        id: Ulid::new(),
        venue_id,
        room_number: number.into(),
        room_type: RoomType::Regular,
        room_desc: String::new(),
    }
}

fn test_reservation(room: &Room, from: u64, to: u64) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Ulid::new(),
        venue_id: room.venue_id,
        room_id: room.id,
        guest_id: Ulid::new(),
        stay: stay(from, to),
        amount: usd(300),
        state: ReservationState::Future,
        created_at: now,
        updated_at: now,
    }
}

// ── Pure validator tests ─────────────────────────────────

#[test]
fn validate_stay_rejects_equal_dates() {
    let result = validate_stay(&stay(10, 10));
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
}

#[test]
fn validate_stay_rejects_reversed_dates() {
    // checkin=day10, checkout=day8
    let result = validate_stay(&stay(10, 8));
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
}

#[test]
fn validate_stay_accepts_one_night() {
    assert!(validate_stay(&stay(10, 11)).is_ok());
}

#[test]
fn validate_stay_rejects_marathon_stays() {
    let result = validate_stay(&StayRange::new(day(0), day(0) + Days::new(400)));
    assert!(matches!(result, Err(BookingError::LimitExceeded(_))));
}

#[test]
fn validate_stay_rejects_out_of_range_years() {
    let ancient = StayRange::new(
        NaiveDate::from_ymd_opt(1999, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(1999, 1, 5).unwrap(),
    );
    assert!(matches!(
        validate_stay(&ancient),
        Err(BookingError::LimitExceeded(_))
    ));
}

#[test]
fn overlap_rejected_whatever_the_order() {
    let venue_id = Ulid::new();
    let room = test_room(venue_id, "1A");
    let a = test_reservation(&room, 1, 4);
    let b = test_reservation(&room, 10, 12);
    let c = test_reservation(&room, 20, 23);

    for order in [
        vec![&a, &b, &c],
        vec![&c, &b, &a],
        vec![&b, &a, &c],
    ] {
        let mut rs = RoomState::new(room.clone());
        for r in order {
            rs.insert_reservation(r.clone());
        }
        // Candidate intersecting b is rejected with b's id, any insert order
        match check_no_overlap(&rs, &stay(11, 14), None) {
            Err(BookingError::OverlapConflict(id)) => assert_eq!(id, b.id),
            other => panic!("expected OverlapConflict, got {other:?}"),
        }
        // A candidate clear of all three is accepted
        assert!(check_no_overlap(&rs, &stay(5, 9), None).is_ok());
    }
}

#[test]
fn back_to_back_stays_do_not_conflict() {
    let room = test_room(Ulid::new(), "1A");
    let mut rs = RoomState::new(room.clone());
    rs.insert_reservation(test_reservation(&room, 1, 3));
    assert!(check_no_overlap(&rs, &stay(3, 5), None).is_ok());
    assert!(check_no_overlap(&rs, &stay(0, 1), None).is_ok());
}

#[test]
fn single_shared_night_conflicts() {
    let room = test_room(Ulid::new(), "1A");
    let mut rs = RoomState::new(room.clone());
    rs.insert_reservation(test_reservation(&room, 1, 3));
    assert!(matches!(
        check_no_overlap(&rs, &stay(2, 5), None),
        Err(BookingError::OverlapConflict(_))
    ));
}

#[test]
fn excluded_id_does_not_conflict_with_itself() {
    let room = test_room(Ulid::new(), "1A");
    let existing = test_reservation(&room, 1, 5);
    let mut rs = RoomState::new(room.clone());
    rs.insert_reservation(existing.clone());

    // Same dates as its own: fine when excluded, a conflict otherwise
    assert!(check_no_overlap(&rs, &stay(1, 5), Some(existing.id)).is_ok());
    assert!(check_no_overlap(&rs, &stay(1, 5), None).is_err());
    // Excluding does not hide other reservations
    let other = test_reservation(&room, 7, 9);
    rs.insert_reservation(other.clone());
    assert!(matches!(
        check_no_overlap(&rs, &stay(4, 8), Some(existing.id)),
        Err(BookingError::OverlapConflict(id)) if id == other.id
    ));
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("stayd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

struct Hotel {
    engine: Engine,
    venue_id: Ulid,
    room_id: Ulid,
    guest_id: Ulid,
}

/// Fixture: one venue, one room "1A", one guest.
async fn hotel(name: &str) -> Hotel {
    let engine = new_engine(name);
    let venue_id = Ulid::new();
    engine
        .create_venue(venue_id, addr("HotelABC"), "America/Los_Angeles".into())
        .await
        .unwrap();
    let room_id = Ulid::new();
    engine
        .create_room(room_id, venue_id, "1A".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
    let guest_id = Ulid::new();
    engine.create_guest(guest_id, addr("Guest 1")).await.unwrap();
    Hotel {
        engine,
        venue_id,
        room_id,
        guest_id,
    }
}

impl Hotel {
    async fn book(&self, from: u64, to: u64) -> Result<Ulid, BookingError> {
        let id = Ulid::new();
        self.engine
            .book_reservation(id, self.venue_id, self.room_id, self.guest_id, stay(from, to), usd(300))
            .await?;
        Ok(id)
    }
}

#[tokio::test]
async fn create_and_get_venue() {
    let engine = new_engine("create_venue.wal");
    let id = Ulid::new();
    engine
        .create_venue(id, addr("HotelABC"), "America/Los_Angeles".into())
        .await
        .unwrap();

    let venue = engine.get_venue(&id).unwrap();
    assert_eq!(venue.address.name, "HotelABC");
    assert!(!venue.disabled);
    assert_eq!(engine.list_venues().len(), 1);
}

#[tokio::test]
async fn duplicate_venue_rejected() {
    let engine = new_engine("dup_venue.wal");
    let id = Ulid::new();
    engine
        .create_venue(id, addr("HotelABC"), "America/Los_Angeles".into())
        .await
        .unwrap();
    let result = engine
        .create_venue(id, addr("HotelXYZ"), "America/New_York".into())
        .await;
    assert!(matches!(result, Err(BookingError::AlreadyExists(_))));
}

#[tokio::test]
async fn venue_requires_timezone() {
    let engine = new_engine("venue_tz.wal");
    let result = engine.create_venue(Ulid::new(), addr("HotelABC"), String::new()).await;
    assert!(matches!(result, Err(BookingError::LimitExceeded(_))));
}

#[tokio::test]
async fn update_venue_flips_disabled() {
    let h = hotel("venue_disable.wal").await;
    let venue = h.engine.get_venue(&h.venue_id).unwrap();
    h.engine
        .update_venue(h.venue_id, venue.address, venue.timezone, true)
        .await
        .unwrap();
    assert!(h.engine.get_venue(&h.venue_id).unwrap().disabled);
}

#[tokio::test]
async fn delete_venue_with_rooms_fails() {
    let h = hotel("delete_venue_rooms.wal").await;
    let result = h.engine.delete_venue(h.venue_id).await;
    assert!(matches!(result, Err(BookingError::HasRooms(_))));

    h.engine.delete_room(h.room_id).await.unwrap();
    h.engine.delete_venue(h.venue_id).await.unwrap();
    assert!(h.engine.get_venue(&h.venue_id).is_none());
}

#[tokio::test]
async fn room_requires_existing_venue() {
    let engine = new_engine("room_no_venue.wal");
    let result = engine
        .create_room(Ulid::new(), Ulid::new(), "1".into(), RoomType::Regular, String::new())
        .await;
    assert!(matches!(result, Err(BookingError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_room_number_rejected() {
    let h = hotel("dup_room_number.wal").await;
    let result = h
        .engine
        .create_room(Ulid::new(), h.venue_id, "1A".into(), RoomType::Suite, String::new())
        .await;
    assert!(matches!(
        result,
        Err(BookingError::DuplicateRoomNumber { .. })
    ));

    // Same number on another venue is fine
    let other_venue = Ulid::new();
    h.engine
        .create_venue(other_venue, addr("HotelXYZ"), "America/New_York".into())
        .await
        .unwrap();
    h.engine
        .create_room(Ulid::new(), other_venue, "1A".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn update_room_renumbers() {
    let h = hotel("room_renumber.wal").await;
    h.engine
        .update_room(h.room_id, "2B".into(), RoomType::Deluxe, "corner room".into())
        .await
        .unwrap();

    let room = h.engine.get_room_info(&h.room_id).await.unwrap();
    assert_eq!(room.room_number, "2B");
    assert_eq!(room.room_type, RoomType::Deluxe);

    // The old number is free again, the new one is taken
    h.engine
        .create_room(Ulid::new(), h.venue_id, "1A".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
    let result = h
        .engine
        .create_room(Ulid::new(), h.venue_id, "2B".into(), RoomType::Regular, String::new())
        .await;
    assert!(matches!(
        result,
        Err(BookingError::DuplicateRoomNumber { .. })
    ));
}

#[tokio::test]
async fn list_rooms_filters() {
    let h = hotel("list_rooms.wal").await;
    h.engine
        .create_room(Ulid::new(), h.venue_id, "2".into(), RoomType::Deluxe, String::new())
        .await
        .unwrap();
    let other_venue = Ulid::new();
    h.engine
        .create_venue(other_venue, addr("HotelXYZ"), "America/New_York".into())
        .await
        .unwrap();
    h.engine
        .create_room(Ulid::new(), other_venue, "1A".into(), RoomType::Regular, String::new())
        .await
        .unwrap();

    assert_eq!(h.engine.list_rooms(None, None).await.len(), 3);
    assert_eq!(h.engine.list_rooms(Some(h.venue_id), None).await.len(), 2);
    assert_eq!(h.engine.list_rooms(None, Some("1A")).await.len(), 2);
    assert_eq!(
        h.engine.list_rooms(Some(h.venue_id), Some("1A")).await.len(),
        1
    );
}

#[tokio::test]
async fn delete_guest_with_reservations_fails() {
    let h = hotel("delete_guest.wal").await;
    let id = h.book(1, 4).await.unwrap();
    let result = h.engine.delete_guest(h.guest_id).await;
    assert!(matches!(result, Err(BookingError::HasReservations(_))));

    h.engine.cancel_reservation(id).await.unwrap();
    h.engine.delete_guest(h.guest_id).await.unwrap();
    assert!(h.engine.get_guest(&h.guest_id).is_none());
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_and_read_back() {
    let h = hotel("book_basic.wal").await;
    let id = h.book(1, 4).await.unwrap();

    let r = h.engine.get_reservation(&id).await.unwrap();
    assert_eq!(r.stay, stay(1, 4));
    assert_eq!(r.state, ReservationState::Future);
    assert_eq!(r.amount, usd(300));
    assert_eq!(r.venue_id, h.venue_id);
    assert_eq!(r.room_id, h.room_id);
    assert_eq!(r.guest_id, h.guest_id);
}

#[tokio::test]
async fn book_rejects_unknown_references() {
    let h = hotel("book_unknown.wal").await;
    let err = h
        .engine
        .book_reservation(Ulid::new(), Ulid::new(), h.room_id, h.guest_id, stay(1, 4), usd(300))
        .await;
    assert!(matches!(err, Err(BookingError::NotFound(_))));

    let err = h
        .engine
        .book_reservation(Ulid::new(), h.venue_id, Ulid::new(), h.guest_id, stay(1, 4), usd(300))
        .await;
    assert!(matches!(err, Err(BookingError::NotFound(_))));

    let err = h
        .engine
        .book_reservation(Ulid::new(), h.venue_id, h.room_id, Ulid::new(), stay(1, 4), usd(300))
        .await;
    assert!(matches!(err, Err(BookingError::NotFound(_))));
}

#[tokio::test]
async fn book_rejects_disabled_venue() {
    let h = hotel("book_disabled.wal").await;
    let venue = h.engine.get_venue(&h.venue_id).unwrap();
    h.engine
        .update_venue(h.venue_id, venue.address, venue.timezone, true)
        .await
        .unwrap();

    let result = h.book(1, 4).await;
    assert!(matches!(result, Err(BookingError::VenueDisabled(_))));
}

#[tokio::test]
async fn book_rejects_foreign_room() {
    let h = hotel("book_mismatch.wal").await;
    let other_venue = Ulid::new();
    h.engine
        .create_venue(other_venue, addr("HotelXYZ"), "America/New_York".into())
        .await
        .unwrap();

    // Reservation names the other venue but our venue's room
    let result = h
        .engine
        .book_reservation(Ulid::new(), other_venue, h.room_id, h.guest_id, stay(1, 4), usd(300))
        .await;
    assert!(matches!(result, Err(BookingError::VenueMismatch { .. })));
}

#[tokio::test]
async fn book_rejects_overlap() {
    let h = hotel("book_overlap.wal").await;
    let first = h.book(0, 5).await.unwrap();

    // Room 1A holds [day0, day5); [day0, day2) must lose
    match h.book(0, 2).await {
        Err(BookingError::OverlapConflict(id)) => assert_eq!(id, first),
        other => panic!("expected OverlapConflict, got {other:?}"),
    }
    // ... and so must every intersecting shape
    assert!(h.book(4, 9).await.is_err());
    assert!(h.book(2, 3).await.is_err());

    // [day5, day7) starts the night the first stay ends: accepted
    h.book(5, 7).await.unwrap();
}

#[tokio::test]
async fn book_rejects_invalid_range() {
    let h = hotel("book_bad_range.wal").await;
    // checkin=day10, checkout=day8
    let result = h.book(10, 8).await;
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
    let result = h.book(10, 10).await;
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
    // The invalid candidate left nothing behind
    assert!(h.engine.list_reservations(None, None).await.is_empty());
}

#[tokio::test]
async fn book_rejects_negative_amount() {
    let h = hotel("book_negative.wal").await;
    let result = h
        .engine
        .book_reservation(Ulid::new(), h.venue_id, h.room_id, h.guest_id, stay(1, 4), usd(-10))
        .await;
    assert!(matches!(result, Err(BookingError::LimitExceeded(_))));
}

#[tokio::test]
async fn different_rooms_do_not_conflict() {
    let h = hotel("book_two_rooms.wal").await;
    let room2 = Ulid::new();
    h.engine
        .create_room(room2, h.venue_id, "2".into(), RoomType::Regular, String::new())
        .await
        .unwrap();

    h.book(1, 4).await.unwrap();
    h.engine
        .book_reservation(Ulid::new(), h.venue_id, room2, h.guest_id, stay(1, 4), usd(300))
        .await
        .unwrap();
}

#[tokio::test]
async fn racing_bookings_one_wins() {
    let h = hotel("book_race.wal").await;
    let (a, b) = tokio::join!(h.book(1, 5), h.book(3, 8));
    let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one racing booking must win: {a:?} / {b:?}");
    assert_eq!(h.engine.list_reservations(None, None).await.len(), 1);
}

// ── Updates & transitions ────────────────────────────────

#[tokio::test]
async fn update_keeps_own_dates_without_conflict() {
    let h = hotel("update_self.wal").await;
    let id = h.book(1, 5).await.unwrap();

    // Same dates it already has — must not reject itself
    h.engine
        .update_reservation(id, h.venue_id, h.room_id, h.guest_id, stay(1, 5), usd(350))
        .await
        .unwrap();
    let r = h.engine.get_reservation(&id).await.unwrap();
    assert_eq!(r.amount, usd(350));
    assert_eq!(r.stay, stay(1, 5));
}

#[tokio::test]
async fn update_into_neighbor_rejected() {
    let h = hotel("update_overlap.wal").await;
    let id = h.book(1, 3).await.unwrap();
    let neighbor = h.book(3, 6).await.unwrap();

    let result = h
        .engine
        .update_reservation(id, h.venue_id, h.room_id, h.guest_id, stay(1, 4), usd(300))
        .await;
    match result {
        Err(BookingError::OverlapConflict(conflicting)) => assert_eq!(conflicting, neighbor),
        other => panic!("expected OverlapConflict, got {other:?}"),
    }
    // Nothing changed
    assert_eq!(h.engine.get_reservation(&id).await.unwrap().stay, stay(1, 3));
}

#[tokio::test]
async fn update_rejects_invalid_range() {
    let h = hotel("update_bad_range.wal").await;
    let id = h.book(1, 3).await.unwrap();
    let result = h
        .engine
        .update_reservation(id, h.venue_id, h.room_id, h.guest_id, stay(9, 9), usd(300))
        .await;
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));
}

#[tokio::test]
async fn update_moves_reservation_between_rooms() {
    let h = hotel("update_move.wal").await;
    let room2 = Ulid::new();
    h.engine
        .create_room(room2, h.venue_id, "2".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
    let id = h.book(1, 4).await.unwrap();
    let created_at = h.engine.get_reservation(&id).await.unwrap().created_at;

    h.engine
        .update_reservation(id, h.venue_id, room2, h.guest_id, stay(1, 4), usd(300))
        .await
        .unwrap();

    let moved = h.engine.get_reservation(&id).await.unwrap();
    assert_eq!(moved.room_id, room2);
    assert_eq!(moved.created_at, created_at);
    // The old room is free again
    h.book(1, 4).await.unwrap();
    // The new room is not
    assert!(h
        .engine
        .list_reservations(None, Some(room2))
        .await
        .iter()
        .any(|r| r.id == id));
}

#[tokio::test]
async fn update_move_rejected_when_target_occupied() {
    let h = hotel("update_move_conflict.wal").await;
    let room2 = Ulid::new();
    h.engine
        .create_room(room2, h.venue_id, "2".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
    h.engine
        .book_reservation(Ulid::new(), h.venue_id, room2, h.guest_id, stay(2, 6), usd(300))
        .await
        .unwrap();
    let id = h.book(1, 4).await.unwrap();

    let result = h
        .engine
        .update_reservation(id, h.venue_id, room2, h.guest_id, stay(1, 4), usd(300))
        .await;
    assert!(matches!(result, Err(BookingError::OverlapConflict(_))));
    // Still on the original room
    assert_eq!(
        h.engine.get_reservation(&id).await.unwrap().room_id,
        h.room_id
    );
}

#[tokio::test]
async fn state_transitions_walk_forward_only() {
    let h = hotel("transitions.wal").await;
    let id = h.book(1, 4).await.unwrap();

    // Cannot check out before checking in
    assert!(matches!(
        h.engine.check_out(id).await,
        Err(BookingError::InvalidTransition { .. })
    ));

    h.engine.check_in(id).await.unwrap();
    assert_eq!(
        h.engine.get_reservation(&id).await.unwrap().state,
        ReservationState::CheckedIn
    );

    // Double check-in is invalid
    assert!(matches!(
        h.engine.check_in(id).await,
        Err(BookingError::InvalidTransition { .. })
    ));

    h.engine.check_out(id).await.unwrap();
    assert_eq!(
        h.engine.get_reservation(&id).await.unwrap().state,
        ReservationState::CheckedOut
    );
    assert!(matches!(
        h.engine.check_out(id).await,
        Err(BookingError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cancel_frees_the_room() {
    let h = hotel("cancel.wal").await;
    let id = h.book(1, 5).await.unwrap();
    assert!(h.book(2, 4).await.is_err());

    h.engine.cancel_reservation(id).await.unwrap();
    assert!(h.engine.get_reservation(&id).await.is_none());

    // The nights are bookable again
    h.book(2, 4).await.unwrap();
}

#[tokio::test]
async fn cancel_unknown_reservation_fails() {
    let h = hotel("cancel_unknown.wal").await;
    let result = h.engine.cancel_reservation(Ulid::new()).await;
    assert!(matches!(result, Err(BookingError::NotFound(_))));
}

#[tokio::test]
async fn find_overlapping_is_a_range_query() {
    let h = hotel("find_overlapping.wal").await;
    let a = h.book(1, 4).await.unwrap();
    let b = h.book(6, 9).await.unwrap();
    h.book(12, 15).await.unwrap();

    let hits = h.engine.find_overlapping(h.room_id, stay(3, 7)).await.unwrap();
    let ids: Vec<Ulid> = hits.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b]);

    // Back-to-back boundaries stay out of the result
    let hits = h.engine.find_overlapping(h.room_id, stay(4, 6)).await.unwrap();
    assert!(hits.is_empty());
}

// ── WAL persistence ──────────────────────────────────────

#[tokio::test]
async fn state_survives_replay() {
    let path = test_wal_path("replay.wal");
    let venue_id = Ulid::new();
    let room_id = Ulid::new();
    let guest_id = Ulid::new();
    let reservation_id = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .create_venue(venue_id, addr("HotelABC"), "America/Los_Angeles".into())
            .await
            .unwrap();
        engine
            .create_room(room_id, venue_id, "1A".into(), RoomType::Suite, "top floor".into())
            .await
            .unwrap();
        engine.create_guest(guest_id, addr("Guest 1")).await.unwrap();
        engine
            .book_reservation(reservation_id, venue_id, room_id, guest_id, stay(1, 4), usd(300))
            .await
            .unwrap();
        engine.check_in(reservation_id).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_venue(&venue_id).unwrap().address.name, "HotelABC");
    assert_eq!(engine.get_guest(&guest_id).unwrap().address.name, "Guest 1");
    let room = engine.get_room_info(&room_id).await.unwrap();
    assert_eq!(room.room_number, "1A");
    assert_eq!(room.room_type, RoomType::Suite);

    let r = engine.get_reservation(&reservation_id).await.unwrap();
    assert_eq!(r.stay, stay(1, 4));
    assert_eq!(r.state, ReservationState::CheckedIn);

    // The replayed state still enforces the overlap rule
    let result = engine
        .book_reservation(Ulid::new(), venue_id, room_id, guest_id, stay(2, 3), usd(100))
        .await;
    assert!(matches!(result, Err(BookingError::OverlapConflict(_))));
}

#[tokio::test]
async fn replay_applies_moves_and_cancellations() {
    let path = test_wal_path("replay_moves.wal");
    let venue_id = Ulid::new();
    let room1 = Ulid::new();
    let room2 = Ulid::new();
    let guest_id = Ulid::new();
    let moved = Ulid::new();
    let cancelled = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .create_venue(venue_id, addr("HotelABC"), "America/Los_Angeles".into())
            .await
            .unwrap();
        for (id, number) in [(room1, "1"), (room2, "2")] {
            engine
                .create_room(id, venue_id, number.into(), RoomType::Regular, String::new())
                .await
                .unwrap();
        }
        engine.create_guest(guest_id, addr("Guest 1")).await.unwrap();
        engine
            .book_reservation(moved, venue_id, room1, guest_id, stay(1, 4), usd(300))
            .await
            .unwrap();
        engine
            .book_reservation(cancelled, venue_id, room1, guest_id, stay(10, 12), usd(200))
            .await
            .unwrap();
        engine
            .update_reservation(moved, venue_id, room2, guest_id, stay(2, 5), usd(320))
            .await
            .unwrap();
        engine.cancel_reservation(cancelled).await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let r = engine.get_reservation(&moved).await.unwrap();
    assert_eq!(r.room_id, room2);
    assert_eq!(r.stay, stay(2, 5));
    assert_eq!(r.amount, usd(320));
    assert!(engine.get_reservation(&cancelled).await.is_none());
    assert!(engine.list_reservations(None, Some(room1)).await.is_empty());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let venue_id = Ulid::new();
    let room_id = Ulid::new();
    let guest_id = Ulid::new();
    let keeper = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .create_venue(venue_id, addr("HotelABC"), "America/Los_Angeles".into())
            .await
            .unwrap();
        engine
            .create_room(room_id, venue_id, "1A".into(), RoomType::Regular, String::new())
            .await
            .unwrap();
        engine.create_guest(guest_id, addr("Guest 1")).await.unwrap();

        // Churn: book and cancel repeatedly, keep one
        for _ in 0..10 {
            let id = Ulid::new();
            engine
                .book_reservation(id, venue_id, room_id, guest_id, stay(1, 4), usd(100))
                .await
                .unwrap();
            engine.cancel_reservation(id).await.unwrap();
        }
        engine
            .book_reservation(keeper, venue_id, room_id, guest_id, stay(1, 4), usd(300))
            .await
            .unwrap();
        engine.check_in(keeper).await.unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let r = engine.get_reservation(&keeper).await.unwrap();
    assert_eq!(r.state, ReservationState::CheckedIn);
    assert_eq!(r.stay, stay(1, 4));
    assert_eq!(engine.list_reservations(None, None).await.len(), 1);
}

// ── Calendar materialization ─────────────────────────────

#[tokio::test]
async fn materialize_one_room_one_reservation() {
    let h = hotel("mat_basic.wal").await;
    let id = h.book(0, 3).await.unwrap(); // amount 300 over [day0, day3)

    let policy = PricingPolicy::FlatRate { nightly: usd(100) };
    let rows = h
        .engine
        .materialize_calendar(h.venue_id, stay(0, 4), &policy)
        .await
        .unwrap();

    assert_eq!(rows.len(), 4);
    for row in &rows[..3] {
        assert_eq!(row.reservation, Some(id));
        assert_eq!(row.price, usd(100));
        assert_eq!(row.room_id, h.room_id);
    }
    assert_eq!(rows[3].day, day(3));
    assert_eq!(rows[3].reservation, None);
}

#[tokio::test]
async fn materialize_is_idempotent() {
    let h = hotel("mat_idempotent.wal").await;
    h.book(0, 3).await.unwrap();

    let policy = PricingPolicy::FlatRate { nightly: usd(100) };
    let first = h
        .engine
        .materialize_calendar(h.venue_id, stay(0, 10), &policy)
        .await
        .unwrap();
    let second = h
        .engine
        .materialize_calendar(h.venue_id, stay(0, 10), &policy)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        h.engine.calendar_days(h.venue_id, stay(0, 10)).await,
        first
    );
}

#[tokio::test]
async fn materialize_drops_stale_rows() {
    let h = hotel("mat_stale.wal").await;
    let id = h.book(0, 3).await.unwrap();
    let policy = PricingPolicy::FlatRate { nightly: usd(100) };

    h.engine
        .materialize_calendar(h.venue_id, stay(0, 5), &policy)
        .await
        .unwrap();
    h.engine.cancel_reservation(id).await.unwrap();
    h.engine
        .materialize_calendar(h.venue_id, stay(0, 5), &policy)
        .await
        .unwrap();

    let rows = h.engine.calendar_days(h.venue_id, stay(0, 5)).await;
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|row| row.reservation.is_none()));
}

#[tokio::test]
async fn materialize_window_validation() {
    let h = hotel("mat_window.wal").await;
    let policy = PricingPolicy::FlatRate { nightly: usd(100) };

    let result = h
        .engine
        .materialize_calendar(h.venue_id, stay(4, 4), &policy)
        .await;
    assert!(matches!(result, Err(BookingError::InvalidRange { .. })));

    let wide = StayRange::new(day(0), day(0) + Days::new(400));
    let result = h.engine.materialize_calendar(h.venue_id, wide, &policy).await;
    assert!(matches!(result, Err(BookingError::LimitExceeded(_))));

    let result = h
        .engine
        .materialize_calendar(Ulid::new(), stay(0, 5), &policy)
        .await;
    assert!(matches!(result, Err(BookingError::NotFound(_))));
}

#[tokio::test]
async fn materialize_covers_every_room() {
    let h = hotel("mat_rooms.wal").await;
    let room2 = Ulid::new();
    h.engine
        .create_room(room2, h.venue_id, "2".into(), RoomType::Deluxe, String::new())
        .await
        .unwrap();
    let id = h.book(1, 3).await.unwrap();

    let policy = PricingPolicy::FlatRate { nightly: usd(100) };
    let rows = h
        .engine
        .materialize_calendar(h.venue_id, stay(1, 3), &policy)
        .await
        .unwrap();

    assert_eq!(rows.len(), 4); // 2 days × 2 rooms
    let occupied: Vec<_> = rows.iter().filter(|r| r.reservation == Some(id)).collect();
    assert_eq!(occupied.len(), 2);
    assert!(occupied.iter().all(|r| r.room_id == h.room_id));
}

#[tokio::test]
async fn calendar_day_lists_every_room_for_one_day() {
    let h = hotel("mat_day.wal").await;
    let room2 = Ulid::new();
    h.engine
        .create_room(room2, h.venue_id, "2".into(), RoomType::Regular, String::new())
        .await
        .unwrap();
    h.book(1, 3).await.unwrap();

    let policy = PricingPolicy::FlatRate { nightly: usd(100) };
    h.engine
        .materialize_calendar(h.venue_id, stay(0, 5), &policy)
        .await
        .unwrap();

    let rows = h.engine.calendar_day(h.venue_id, day(2)).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.day == day(2)));
    assert_eq!(rows.iter().filter(|r| r.reservation.is_some()).count(), 1);
}

#[tokio::test]
async fn prorata_policy_prices_from_the_reservation() {
    let h = hotel("mat_prorata.wal").await;
    h.book(0, 3).await.unwrap(); // 300 over 3 nights

    let policy = PricingPolicy::ProRata { fallback: usd(80) };
    let rows = h
        .engine
        .materialize_calendar(h.venue_id, stay(0, 4), &policy)
        .await
        .unwrap();

    assert_eq!(rows[0].price, usd(100));
    assert_eq!(rows[1].price, usd(100));
    assert_eq!(rows[2].price, usd(100));
    assert_eq!(rows[3].price, usd(80)); // free night falls back
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn committed_bookings_are_published() {
    let h = hotel("notify_booking.wal").await;
    let mut rx = h.engine.notify.subscribe(h.venue_id);

    let id = h.book(1, 4).await.unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::ReservationBooked { id: got, room_id, .. } => {
            assert_eq!(got, id);
            assert_eq!(room_id, h.room_id);
        }
        other => panic!("expected ReservationBooked, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_bookings_are_not_published() {
    let h = hotel("notify_rejected.wal").await;
    h.book(1, 4).await.unwrap();

    let mut rx = h.engine.notify.subscribe(h.venue_id);
    assert!(h.book(2, 3).await.is_err());

    // Nothing was committed, so nothing arrives
    assert!(matches!(
        rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}
