use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use water_client::{HourlySnapshot, KeyRange, ReadingStore, SortOrder, StoreError};

use crate::calendar::{ReferenceZone, SECONDS_PER_HOUR};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupOutcome {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn now_epoch() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Snapshot every device's latest reading for the reference-zone hour containing `now`.
///
/// A device that already has a snapshot in this hour is skipped, so repeating a
/// tick within the hour writes nothing. Only failing to list devices is an error;
/// per-device failures are logged and counted in the outcome.
pub async fn run_tick(
    store: &dyn ReadingStore,
    zone: &ReferenceZone,
    now: i64,
) -> Result<RollupOutcome, StoreError> {
    let hour = zone.hour_start(now);
    let devices = store.device_ids().await?;
    let mut outcome = RollupOutcome::default();

    for device_id in &devices {
        match snapshot_device(store, device_id, hour, now).await {
            Ok(true) => outcome.written += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.failed += 1;
                metrics::counter!("rollup_device_failures_total").increment(1);
                tracing::error!(
                    device_id = %device_id,
                    error = %e,
                    "hourly roll-up failed for device"
                );
            }
        }
    }

    metrics::counter!("rollup_snapshots_written_total").increment(outcome.written as u64);
    tracing::info!(
        devices = devices.len(),
        written = outcome.written,
        skipped = outcome.skipped,
        failed = outcome.failed,
        hour_start = hour,
        "hourly roll-up tick complete"
    );

    Ok(outcome)
}

/// Returns whether a snapshot was written.
async fn snapshot_device(
    store: &dyn ReadingStore,
    device_id: &str,
    hour: i64,
    now: i64,
) -> Result<bool, StoreError> {
    let existing = store
        .query_snapshots(
            device_id,
            KeyRange::half_open(hour, hour + SECONDS_PER_HOUR),
            SortOrder::Asc,
            Some(1),
        )
        .await?;
    if !existing.is_empty() {
        return Ok(false);
    }

    let Some(reading) = store.latest_reading(device_id).await? else {
        return Ok(false);
    };

    let snapshot = HourlySnapshot::from_reading(&reading, now).ok_or_else(|| {
        StoreError::Malformed(format!(
            "latest reading {} has no cumulative value",
            reading.reading_id
        ))
    })?;

    store.put_snapshot(&snapshot).await?;
    tracing::debug!(
        device_id,
        fetch_timestamp = now,
        flow = snapshot.flow_reading,
        "wrote hourly snapshot"
    );
    Ok(true)
}

pub struct RollupService {
    store: Arc<dyn ReadingStore>,
    zone: ReferenceZone,
    period: Duration,
}

pub struct RollupHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RollupHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "roll-up task did not shut down cleanly");
        }
    }
}

impl RollupService {
    pub fn new(store: Arc<dyn ReadingStore>, zone: ReferenceZone, period: Duration) -> Self {
        Self {
            store,
            zone,
            period: period.max(Duration::from_secs(1)),
        }
    }

    /// Spawn the roll-up loop. The first tick fires at the next top of the
    /// hour in the reference zone, then every `period`.
    pub fn start(self, cancel: CancellationToken) -> RollupHandle {
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let wait = u64::try_from(self.zone.seconds_until_next_hour(now_epoch())).unwrap_or(0);
            let first_tick = Instant::now() + Duration::from_secs(wait);
            let mut ticker = tokio::time::interval_at(first_tick, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                first_tick_in_secs = wait,
                period_secs = self.period.as_secs(),
                "roll-up scheduled"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let tick = run_tick(self.store.as_ref(), &self.zone, now_epoch()).await;
                        if let Err(e) = tick {
                            tracing::error!(error = %e, "hourly roll-up tick failed");
                        }
                    }
                }
            }
            tracing::info!("roll-up stopped");
        });

        RollupHandle { cancel, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use water_client::{MemoryStore, Reading};

    const NOW: i64 = 1_718_438_400 + 1_234;

    #[tokio::test]
    async fn tick_snapshots_latest_reading_per_device() {
        let store = MemoryStore::new();
        store
            .put_readings(&[
                Reading::new("A", NOW - 500, 10, 0),
                Reading::new("A", NOW - 100, 12, 500),
                Reading::new("B", NOW - 50, 3, 0),
            ])
            .await
            .unwrap();

        let outcome = run_tick(&store, &ReferenceZone::utc(), NOW).await.unwrap();
        assert_eq!(outcome, RollupOutcome { written: 2, skipped: 0, failed: 0 });

        let snaps = store
            .query_snapshots("A", KeyRange::all(), SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].fetch_timestamp, NOW);
        assert_eq!(snaps[0].timestamp, NOW - 100);
        assert_eq!(snaps[0].flow_reading, 12.5);
    }

    #[tokio::test]
    async fn second_tick_in_same_hour_writes_nothing() {
        let store = MemoryStore::new();
        store.put_reading(&Reading::new("A", NOW - 10, 1, 0)).await.unwrap();
        let zone = ReferenceZone::default();

        run_tick(&store, &zone, NOW).await.unwrap();
        let again = run_tick(&store, &zone, NOW + 60).await.unwrap();
        assert_eq!(again, RollupOutcome { written: 0, skipped: 1, failed: 0 });

        let snaps = store
            .query_snapshots("A", KeyRange::all(), SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(snaps.len(), 1);
    }

    #[tokio::test]
    async fn next_hour_writes_a_new_snapshot() {
        let store = MemoryStore::new();
        store.put_reading(&Reading::new("A", NOW - 10, 1, 0)).await.unwrap();
        let zone = ReferenceZone::utc();

        run_tick(&store, &zone, NOW).await.unwrap();
        let later = run_tick(&store, &zone, NOW + SECONDS_PER_HOUR).await.unwrap();
        assert_eq!(later.written, 1);
    }

    #[tokio::test]
    async fn malformed_latest_reading_is_counted_not_fatal() {
        let store = MemoryStore::new();
        store
            .put_readings(&[
                Reading::new("A", NOW - 10, 1, 5_000),
                Reading::new("B", NOW - 10, 2, 0),
            ])
            .await
            .unwrap();

        let outcome = run_tick(&store, &ReferenceZone::utc(), NOW).await.unwrap();
        assert_eq!(outcome, RollupOutcome { written: 1, skipped: 0, failed: 1 });
    }

    #[tokio::test]
    async fn service_stops_on_cancel() {
        let store: Arc<dyn ReadingStore> = Arc::new(MemoryStore::new());
        let handle = RollupService::new(store, ReferenceZone::utc(), Duration::from_secs(3600))
            .start(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
    }
}
