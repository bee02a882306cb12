use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use super::{KeyRange, ReadingStore, SortOrder, StoreError};
use crate::domain::{HourlySnapshot, Reading};

type Partition<T> = BTreeMap<i64, T>;

/// In-process ordered store. Each device partition is a `BTreeMap` keyed by
/// the sort key, so range scans come back ordered without sorting.
#[derive(Default)]
pub struct MemoryStore {
    readings: RwLock<HashMap<String, Partition<Reading>>>,
    snapshots: RwLock<HashMap<String, Partition<HourlySnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn scan<T: Clone>(
    partition: Option<&Partition<T>>,
    range: KeyRange,
    order: SortOrder,
    limit: Option<usize>,
) -> Vec<T> {
    let Some(partition) = partition else {
        return Vec::new();
    };
    if range.is_empty() {
        return Vec::new();
    }

    let limit = limit.unwrap_or(usize::MAX);
    let iter = partition.range((range.lower, range.upper)).map(|(_, v)| v.clone());
    match order {
        SortOrder::Asc => iter.take(limit).collect(),
        SortOrder::Desc => iter.rev().take(limit).collect(),
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryStore {
    async fn put_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut guard = self.readings.write().await;
        guard
            .entry(reading.device_id.clone())
            .or_default()
            .insert(reading.timestamp, reading.clone());
        Ok(())
    }

    async fn put_readings(&self, readings: &[Reading]) -> Result<(), StoreError> {
        let mut guard = self.readings.write().await;
        for reading in readings {
            guard
                .entry(reading.device_id.clone())
                .or_default()
                .insert(reading.timestamp, reading.clone());
        }
        Ok(())
    }

    async fn query_readings(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StoreError> {
        let guard = self.readings.read().await;
        Ok(scan(guard.get(device_id), range, order, limit))
    }

    async fn put_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StoreError> {
        let mut guard = self.snapshots.write().await;
        guard
            .entry(snapshot.device_id.clone())
            .or_default()
            .insert(snapshot.fetch_timestamp, snapshot.clone());
        Ok(())
    }

    async fn query_snapshots(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<HourlySnapshot>, StoreError> {
        let guard = self.snapshots.read().await;
        Ok(scan(guard.get(device_id), range, order, limit))
    }

    async fn device_ids(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.readings.read().await;
        let mut ids: Vec<String> = guard
            .iter()
            .filter(|(_, partition)| !partition.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
