use std::ops::Bound;

use crate::domain::{HourlySnapshot, Reading};

pub mod memory;

pub use memory::MemoryStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed stored row: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Bounds on a sort key (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<i64>,
    pub upper: Bound<i64>,
}

impl KeyRange {
    /// `[start, end)`
    pub fn half_open(start: i64, end: i64) -> Self {
        Self {
            lower: Bound::Included(start),
            upper: Bound::Excluded(end),
        }
    }

    /// `(start, end]`
    pub fn left_open(start: i64, end: i64) -> Self {
        Self {
            lower: Bound::Excluded(start),
            upper: Bound::Included(end),
        }
    }

    /// `[start, end]`
    pub fn inclusive(start: i64, end: i64) -> Self {
        Self {
            lower: Bound::Included(start),
            upper: Bound::Included(end),
        }
    }

    /// `(-inf, end)`
    pub fn before(end: i64) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(end),
        }
    }

    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        let above = match self.lower {
            Bound::Included(v) => key >= v,
            Bound::Excluded(v) => key > v,
            Bound::Unbounded => true,
        };
        let below = match self.upper {
            Bound::Included(v) => key <= v,
            Bound::Excluded(v) => key < v,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// True when no key can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Bound::Included(a), Bound::Included(b)) => a > b,
            (Bound::Included(a), Bound::Excluded(b))
            | (Bound::Excluded(a), Bound::Included(b)) => a >= b,
            (Bound::Excluded(a), Bound::Excluded(b)) => a.saturating_add(1) >= b,
            _ => false,
        }
    }
}

/// Ordered key-value storage for readings and hourly snapshots.
///
/// Readings are partitioned by device id and sorted by `timestamp`; snapshots
/// are partitioned by device id and sorted by `fetch_timestamp`. Range queries
/// return rows in the requested order, truncated to `limit` rows when given.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    async fn put_reading(&self, reading: &Reading) -> Result<(), StoreError>;

    async fn put_readings(&self, readings: &[Reading]) -> Result<(), StoreError> {
        for reading in readings {
            self.put_reading(reading).await?;
        }
        Ok(())
    }

    async fn query_readings(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StoreError>;

    async fn put_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StoreError>;

    async fn query_snapshots(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<HourlySnapshot>, StoreError>;

    /// Every device id with at least one stored reading.
    async fn device_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn latest_reading(&self, device_id: &str) -> Result<Option<Reading>, StoreError> {
        let mut rows = self
            .query_readings(device_id, KeyRange::all(), SortOrder::Desc, Some(1))
            .await?;
        Ok(rows.pop())
    }
}
