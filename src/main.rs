use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use stayd::engine::{Engine, PricingPolicy};
use stayd::model::{Address, RoomType, StayRange};
use stayd::notify::NotifyHub;
use stayd::refresh;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("STAYD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    stayd::observability::init(metrics_port);

    let data_dir = std::env::var("STAYD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("STAYD_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let refresh_interval: u64 = std::env::var("STAYD_REFRESH_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);
    let horizon_days: u64 = std::env::var("STAYD_CALENDAR_HORIZON_DAYS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    let nightly_rate: Decimal = std::env::var("STAYD_NIGHTLY_RATE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| Decimal::new(10000, 2)); // 100.00
    let populate = std::env::var("STAYD_POPULATE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("stayd.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify)?);
    let policy = PricingPolicy::FlatRate {
        nightly: nightly_rate,
    };

    info!("stayd starting");
    info!("  data_dir: {data_dir}");
    info!("  refresh: every {refresh_interval}s over a {horizon_days}-day horizon");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    if populate && engine.venues.is_empty() {
        populate_demo(&engine, horizon_days, &policy).await?;
    }

    let refresh_engine = engine.clone();
    let refresh_policy = policy.clone();
    tokio::spawn(async move {
        refresh::run_calendar_refresh(
            refresh_engine,
            Duration::from_secs(refresh_interval),
            horizon_days,
            refresh_policy,
        )
        .await;
    });
    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        refresh::run_compactor(compactor_engine, compact_threshold).await;
    });

    // Run until SIGTERM/ctrl-c; the jobs hold the engine alive.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    info!("stayd stopped");
    Ok(())
}

/// Seed one venue, three rooms, two guests, and two reservations, then
/// materialize the calendar — a demo data set for poking at a fresh store.
async fn populate_demo(
    engine: &Engine,
    horizon_days: u64,
    policy: &PricingPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let today = Utc::now().date_naive();

    let venue_id = Ulid::new();
    engine
        .create_venue(
            venue_id,
            Address::new("HotelABC", "1 Lane", "Los Angeles", "90000"),
            "America/Los_Angeles".into(),
        )
        .await?;
    info!("created venue {venue_id}");

    let mut room_ids = Vec::new();
    for number in ["1", "2", "3"] {
        let room_id = Ulid::new();
        engine
            .create_room(room_id, venue_id, number.into(), RoomType::Regular, String::new())
            .await?;
        room_ids.push(room_id);
    }
    info!("created rooms 1-3");

    let guest1 = Ulid::new();
    engine
        .create_guest(guest1, Address::new("Guest 1", "ABC", "Los Angeles", "90000"))
        .await?;
    let guest2 = Ulid::new();
    engine
        .create_guest(guest2, Address::new("Guest 2", "BOS", "Boston", "40000"))
        .await?;

    // Guest 1 for 3 nights starting today, Guest 2 for 5 nights
    engine
        .book_reservation(
            Ulid::new(),
            venue_id,
            room_ids[0],
            guest1,
            StayRange::new(today, today + Days::new(3)),
            Decimal::new(30000, 2),
        )
        .await?;
    engine
        .book_reservation(
            Ulid::new(),
            venue_id,
            room_ids[1],
            guest2,
            StayRange::new(today, today + Days::new(5)),
            Decimal::new(50000, 2),
        )
        .await?;
    info!("created 2 reservations");

    refresh::refresh_all_venues(engine, horizon_days, policy).await;
    info!("materialized calendar for the next {horizon_days} days");
    Ok(())
}
