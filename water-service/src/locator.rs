//! Hourly snapshot lookups and the snapshot-based device report.

use serde::Serialize;
use water_client::{HourlySnapshot, KeyRange, ReadingStore, SortOrder, StoreError};

use crate::{
    calendar::SECONDS_PER_HOUR,
    consumption::{validate_device_id, ConsumptionError},
};

/// Which end of a report a snapshot lookup anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Search the epoch hour starting at `floor(target / 3600) * 3600`.
    Start,
    /// Search the hour ending at `target`, inclusive.
    End,
}

impl Anchor {
    pub fn window(self, target: i64) -> KeyRange {
        match self {
            Anchor::Start => {
                let hour = hour_floor(target);
                KeyRange::half_open(hour, hour.saturating_add(SECONDS_PER_HOUR))
            }
            Anchor::End => KeyRange::left_open(target.saturating_sub(SECONDS_PER_HOUR), target),
        }
    }
}

pub fn hour_floor(epoch: i64) -> i64 {
    epoch.div_euclid(SECONDS_PER_HOUR).saturating_mul(SECONDS_PER_HOUR)
}

/// Snapshot whose `fetch_timestamp` is closest to `target`; ties go to the earlier one.
pub fn pick_nearest(snapshots: &[HourlySnapshot], target: i64) -> Option<&HourlySnapshot> {
    snapshots
        .iter()
        .min_by_key(|s| (s.fetch_timestamp.abs_diff(target), s.fetch_timestamp))
}

pub async fn find_nearest(
    store: &dyn ReadingStore,
    device_id: &str,
    target: i64,
    anchor: Anchor,
) -> Result<Option<HourlySnapshot>, StoreError> {
    let candidates = store
        .query_snapshots(device_id, anchor.window(target), SortOrder::Asc, None)
        .await?;
    Ok(pick_nearest(&candidates, target).cloned())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub readings: Vec<HourlySnapshot>,
    pub average_usage: f64,
    pub peak_usage: f64,
    pub continuous_flow_percentage: f64,
    pub estimated_leakage: f64,
}

impl DeviceReport {
    /// Summarise snapshots sorted by ascending `fetch_timestamp`.
    pub fn from_snapshots(readings: Vec<HourlySnapshot>) -> Self {
        let average_usage = match (readings.first(), readings.last()) {
            (Some(first), Some(last)) if readings.len() > 1 => {
                (last.flow_reading - first.flow_reading) / (readings.len() - 1) as f64
            }
            _ => 0.0,
        };

        // Largest single-step increase, not divided by the step length.
        let peak_usage = readings
            .windows(2)
            .map(|pair| pair[1].flow_reading - pair[0].flow_reading)
            .fold(0.0, f64::max);

        DeviceReport {
            readings,
            average_usage,
            peak_usage,
            continuous_flow_percentage: 0.0,
            estimated_leakage: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyUsage {
    pub device_id: String,
    pub timestamp: i64,
    pub fetch_timestamp: i64,
    pub reading_id: String,
    /// Liters since the previous snapshot, never negative.
    pub usage: f64,
}

pub fn usage_between(snapshots: &[HourlySnapshot]) -> Vec<HourlyUsage> {
    snapshots
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (&pair[0], &pair[1]);
            HourlyUsage {
                device_id: cur.device_id.clone(),
                timestamp: cur.timestamp,
                fetch_timestamp: cur.fetch_timestamp,
                reading_id: cur.reading_id.clone(),
                usage: (cur.flow_reading - prev.flow_reading).max(0.0),
            }
        })
        .collect()
}

/// Snapshots between the anchors for `[start_ts, end_ts]`, or `None` when
/// either anchor has no snapshot.
async fn anchored_snapshots(
    store: &dyn ReadingStore,
    device_id: &str,
    start_ts: i64,
    end_ts: i64,
) -> Result<Option<Vec<HourlySnapshot>>, ConsumptionError> {
    let device_id = validate_device_id(device_id)?;
    if start_ts > end_ts {
        return Err(ConsumptionError::Validation(format!(
            "startTimestamp {start_ts} is after endTimestamp {end_ts}"
        )));
    }

    let start = find_nearest(store, device_id, hour_floor(start_ts), Anchor::Start).await?;
    let end = find_nearest(store, device_id, end_ts, Anchor::End).await?;

    let (Some(start), Some(end)) = (start, end) else {
        tracing::warn!(device_id, start_ts, end_ts, "no start or end snapshot found");
        return Ok(None);
    };

    if start.fetch_timestamp > end.fetch_timestamp {
        return Ok(Some(Vec::new()));
    }

    let snapshots = store
        .query_snapshots(
            device_id,
            KeyRange::inclusive(start.fetch_timestamp, end.fetch_timestamp),
            SortOrder::Asc,
            None,
        )
        .await?;

    Ok(Some(snapshots))
}

pub async fn hourly_report(
    store: &dyn ReadingStore,
    device_id: &str,
    start_ts: i64,
    end_ts: i64,
) -> Result<DeviceReport, ConsumptionError> {
    Ok(anchored_snapshots(store, device_id, start_ts, end_ts)
        .await?
        .map(DeviceReport::from_snapshots)
        .unwrap_or_default())
}

pub async fn hourly_usage(
    store: &dyn ReadingStore,
    device_id: &str,
    start_ts: i64,
    end_ts: i64,
) -> Result<Vec<HourlyUsage>, ConsumptionError> {
    Ok(anchored_snapshots(store, device_id, start_ts, end_ts)
        .await?
        .map(|snapshots| usage_between(&snapshots))
        .unwrap_or_default())
}
