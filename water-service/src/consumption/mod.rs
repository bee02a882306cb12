//! Consumption reports: per-bucket water usage derived from cumulative readings.
//!
//! A report is built in three steps. The calendar module yields the bucket
//! boundaries, [`resolver`] finds the meter value in effect at each boundary,
//! and [`delta`] differences consecutive values into per-bucket usage.

pub mod delta;
pub mod resolver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Date;
use water_client::{
    domain::reading::milliliters_to_liters, KeyRange, Reading, ReadingStore, SortOrder, StoreError,
};

use crate::calendar::{self, CalendarError, Granularity, ReferenceZone, ReportWindow};

/// Readings inspected when looking for a baseline before the report window.
const PRIOR_SCAN_LIMIT: usize = 16;

/// Where the running meter value starts before the first boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Start from 0.
    Zero,
    /// Seed with the last reading in the period before the report.
    #[default]
    Lookback,
    /// Seed with the last reading at any time before the report.
    PriorReading,
}

#[derive(thiserror::Error, Debug)]
pub enum ConsumptionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CalendarError> for ConsumptionError {
    fn from(e: CalendarError) -> Self {
        ConsumptionError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionReport {
    pub labels: Vec<String>,
    /// Liters consumed per bucket, aligned with `labels`.
    pub data: Vec<f64>,
    pub start_time: i64,
    pub end_time: i64,
}

impl ConsumptionReport {
    /// Build a report for `window` from readings sorted by ascending timestamp.
    pub fn build(window: &ReportWindow, readings: &[Reading], baseline: Option<i64>) -> Self {
        let cumulative = resolver::resolve_boundary_values(readings, &window.boundaries, baseline);
        let data = delta::deltas(&cumulative)
            .into_iter()
            .map(milliliters_to_liters)
            .collect();

        ConsumptionReport {
            labels: window.labels.clone(),
            data,
            start_time: window.start,
            end_time: window.end,
        }
    }

    pub fn total_liters(&self) -> f64 {
        self.data.iter().sum()
    }
}

pub fn validate_device_id(device_id: &str) -> Result<&str, ConsumptionError> {
    let trimmed = device_id.trim();
    if trimmed.is_empty() {
        return Err(ConsumptionError::Validation("deviceId is required".to_string()));
    }
    Ok(trimmed)
}

pub struct ConsumptionService {
    store: Arc<dyn ReadingStore>,
    zone: ReferenceZone,
    baseline: BaselineMode,
    query_limit: usize,
}

impl ConsumptionService {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        zone: ReferenceZone,
        baseline: BaselineMode,
        query_limit: usize,
    ) -> Self {
        Self {
            store,
            zone,
            baseline,
            query_limit,
        }
    }

    pub fn zone(&self) -> ReferenceZone {
        self.zone
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    /// Consumption of `device_id` per hour, day or month of the period containing
    /// `target` (today in the reference zone when `None`).
    ///
    /// A device with no readings yields a report of zeros, not an error.
    pub async fn report(
        &self,
        device_id: &str,
        granularity: Granularity,
        target: Option<Date>,
    ) -> Result<ConsumptionReport, ConsumptionError> {
        let device_id = validate_device_id(device_id)?;
        let target = target.unwrap_or_else(|| self.zone.today());
        let window = calendar::compute_range(&self.zone, target, granularity)?;

        let baseline = match self.baseline {
            BaselineMode::Zero => None,
            BaselineMode::Lookback => {
                let lookback = calendar::lookback_start(&self.zone, target, granularity, 1)?;
                self.prior_total(device_id, KeyRange::half_open(lookback, window.start)).await?
            }
            BaselineMode::PriorReading => {
                self.prior_total(device_id, KeyRange::before(window.start)).await?
            }
        };

        let mut readings = self
            .store
            .query_readings(
                device_id,
                KeyRange::half_open(window.start, window.end),
                SortOrder::Asc,
                Some(self.query_limit),
            )
            .await?;

        if readings.len() >= self.query_limit {
            tracing::warn!(
                device_id,
                limit = self.query_limit,
                "reading query hit the row limit; later buckets may be understated"
            );
        }

        readings.sort_by_key(|r| r.timestamp);

        let report = ConsumptionReport::build(&window, &readings, baseline);

        metrics::counter!("consumption_reports_total", "granularity" => granularity.as_str())
            .increment(1);
        tracing::debug!(
            device_id,
            %granularity,
            %target,
            readings = readings.len(),
            total_liters = report.total_liters(),
            "built consumption report"
        );

        Ok(report)
    }

    pub async fn latest_reading(&self, device_id: &str) -> Result<Reading, ConsumptionError> {
        let device_id = validate_device_id(device_id)?;
        self.store
            .latest_reading(device_id)
            .await?
            .ok_or_else(|| ConsumptionError::NotFound(format!("no reading for device {device_id}")))
    }

    /// Total of the most recent usable reading within `range`.
    async fn prior_total(
        &self,
        device_id: &str,
        range: KeyRange,
    ) -> Result<Option<i64>, StoreError> {
        let rows = self
            .store
            .query_readings(device_id, range, SortOrder::Desc, Some(PRIOR_SCAN_LIMIT))
            .await?;

        Ok(rows
            .iter()
            .filter_map(Reading::total_milliliters)
            .find(|total| *total > 0))
    }
}
