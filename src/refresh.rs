use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, PricingPolicy};
use crate::model::StayRange;

/// Background task that periodically rebuilds every venue's calendar over a
/// rolling window starting today. One run per venue at a time — concurrent
/// runs for the same venue queue on its calendar mutex.
pub async fn run_calendar_refresh(
    engine: Arc<Engine>,
    every: Duration,
    horizon_days: u64,
    policy: PricingPolicy,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        refresh_all_venues(&engine, horizon_days, &policy).await;
    }
}

/// One refresh pass over every venue. Split out so tests and the startup
/// path can run a single pass without the timer.
pub async fn refresh_all_venues(engine: &Engine, horizon_days: u64, policy: &PricingPolicy) {
    let today = Utc::now().date_naive();
    let Some(horizon) = today.checked_add_days(Days::new(horizon_days)) else {
        tracing::error!("calendar horizon of {horizon_days} days overflows the date range");
        return;
    };
    let window = StayRange::new(today, horizon);

    let venue_ids: Vec<Ulid> = engine.venues.iter().map(|e| *e.key()).collect();
    for venue_id in venue_ids {
        match engine.materialize_calendar(venue_id, window, policy).await {
            Ok(rows) => {
                tracing::debug!("refreshed calendar for venue {venue_id}: {} rows", rows.len());
            }
            Err(e) => {
                // materialize_calendar already logged integrity failures
                tracing::warn!("calendar refresh skipped venue {venue_id}: {e}");
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
