use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Milliliters per liter; a valid `milliliters` component is always below this.
pub const ML_PER_LITER: i64 = 1000;

/// A cumulative flow observation reported by a water meter.
///
/// Readings are append-only. A newer observation for the same device is a new
/// row with a larger `timestamp`; a row with an identical (device, timestamp)
/// key replaces the old one at the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: String,
    /// Epoch seconds.
    pub timestamp: i64,
    pub liters: i64,
    pub milliliters: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, bool>,
    pub reading_id: String,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        timestamp: i64,
        liters: i64,
        milliliters: i64,
    ) -> Self {
        let device_id = device_id.into();
        let reading_id = Self::reading_id_for(&device_id, timestamp);
        Self {
            device_id,
            timestamp,
            liters,
            milliliters,
            status: BTreeMap::new(),
            reading_id,
        }
    }

    pub fn with_status(mut self, status: BTreeMap<String, bool>) -> Self {
        self.status = status;
        self
    }

    pub fn reading_id_for(device_id: &str, timestamp: i64) -> String {
        format!("{device_id}-{timestamp}")
    }

    /// Cumulative meter value in whole milliliters.
    ///
    /// Returns `None` for a malformed reading (negative liters or a
    /// milliliter component outside `0..=999`).
    pub fn total_milliliters(&self) -> Option<i64> {
        if self.liters < 0 || !(0..ML_PER_LITER).contains(&self.milliliters) {
            return None;
        }
        self.liters
            .checked_mul(ML_PER_LITER)
            .and_then(|ml| ml.checked_add(self.milliliters))
    }

    /// Cumulative meter value in liters (`liters + milliliters / 1000`).
    pub fn flow_liters(&self) -> Option<f64> {
        self.total_milliliters().map(milliliters_to_liters)
    }
}

pub fn milliliters_to_liters(ml: i64) -> f64 {
    ml as f64 / ML_PER_LITER as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_id_joins_device_and_timestamp() {
        let r = Reading::new("D1", 1_700_000_000, 12, 345);
        assert_eq!(r.reading_id, "D1-1700000000");
    }

    #[test]
    fn total_milliliters_combines_components() {
        let r = Reading::new("D1", 0, 12, 345);
        assert_eq!(r.total_milliliters(), Some(12_345));
        assert_eq!(r.flow_liters(), Some(12.345));
    }

    #[test]
    fn malformed_components_have_no_total() {
        assert_eq!(Reading::new("D1", 0, -1, 0).total_milliliters(), None);
        assert_eq!(Reading::new("D1", 0, 1, 1000).total_milliliters(), None);
        assert_eq!(Reading::new("D1", 0, 1, -5).total_milliliters(), None);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let r = Reading::new("D1", 10, 1, 2);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["deviceId"], "D1");
        assert_eq!(v["readingId"], "D1-10");
        assert!(v.get("status").is_none());
    }
}
