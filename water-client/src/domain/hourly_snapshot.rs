use serde::{Deserialize, Serialize};

use super::Reading;

/// Down-sampled copy of a device's latest reading, taken by the hourly roll-up.
///
/// Keyed by (`device_id`, `fetch_timestamp`); `timestamp` is the source
/// reading's own timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySnapshot {
    pub device_id: String,
    pub timestamp: i64,
    pub fetch_timestamp: i64,
    /// Cumulative liters at the time of the source reading.
    pub flow_reading: f64,
    pub reading_id: String,
}

impl HourlySnapshot {
    pub fn new(
        device_id: impl Into<String>,
        timestamp: i64,
        fetch_timestamp: i64,
        flow_reading: f64,
    ) -> Self {
        let device_id = device_id.into();
        let reading_id = Reading::reading_id_for(&device_id, fetch_timestamp);
        Self {
            device_id,
            timestamp,
            fetch_timestamp,
            flow_reading,
            reading_id,
        }
    }

    /// Snapshot `reading` as observed at `fetch_timestamp`.
    ///
    /// Returns `None` when the reading is malformed and has no cumulative value.
    pub fn from_reading(reading: &Reading, fetch_timestamp: i64) -> Option<Self> {
        let flow = reading.flow_liters()?;
        Some(Self::new(reading.device_id.clone(), reading.timestamp, fetch_timestamp, flow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_keyed_by_fetch_timestamp() {
        let reading = Reading::new("D1", 100, 7, 250);
        let snap = HourlySnapshot::from_reading(&reading, 3600).unwrap();
        assert_eq!(snap.timestamp, 100);
        assert_eq!(snap.fetch_timestamp, 3600);
        assert_eq!(snap.flow_reading, 7.25);
        assert_eq!(snap.reading_id, "D1-3600");
    }

    #[test]
    fn malformed_reading_has_no_snapshot() {
        let reading = Reading::new("D1", 100, 7, 2500);
        assert!(HourlySnapshot::from_reading(&reading, 3600).is_none());
    }
}
