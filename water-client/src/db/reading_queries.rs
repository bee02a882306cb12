use std::{collections::BTreeMap, ops::Bound};

use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    domain::{HourlySnapshot, Reading},
    store::{KeyRange, ReadingStore, SortOrder, StoreError},
};

/// Tables used by [`PgReadingStore`]. Sort keys are native `BIGINT` epoch
/// seconds so range scans order numerically.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS water_reading (
        device_id   TEXT    NOT NULL,
        ts          BIGINT  NOT NULL,
        liters      BIGINT  NOT NULL,
        milliliters BIGINT  NOT NULL,
        status      JSONB,
        reading_id  TEXT    NOT NULL,
        PRIMARY KEY (device_id, ts)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS water_reading_per_hour (
        device_id    TEXT             NOT NULL,
        fetch_ts     BIGINT           NOT NULL,
        ts           BIGINT           NOT NULL,
        flow_reading DOUBLE PRECISION NOT NULL,
        reading_id   TEXT             NOT NULL,
        PRIMARY KEY (device_id, fetch_ts)
    )
    "#,
];

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReadingRow {
    device_id: String,
    ts: i64,
    liters: i64,
    milliliters: i64,
    status: Option<serde_json::Value>,
    reading_id: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = StoreError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let status = match row.status {
            None | Some(serde_json::Value::Null) => BTreeMap::new(),
            Some(v) => serde_json::from_value::<BTreeMap<String, bool>>(v).map_err(|e| {
                StoreError::Malformed(format!("status of reading {}: {e}", row.reading_id))
            })?,
        };

        Ok(Reading {
            device_id: row.device_id,
            timestamp: row.ts,
            liters: row.liters,
            milliliters: row.milliliters,
            status,
            reading_id: row.reading_id,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SnapshotRow {
    device_id: String,
    fetch_ts: i64,
    ts: i64,
    flow_reading: f64,
    reading_id: String,
}

impl From<SnapshotRow> for HourlySnapshot {
    fn from(row: SnapshotRow) -> Self {
        HourlySnapshot {
            device_id: row.device_id,
            timestamp: row.ts,
            fetch_timestamp: row.fetch_ts,
            flow_reading: row.flow_reading,
            reading_id: row.reading_id,
        }
    }
}

/// Append `AND <column> ... ORDER BY ... LIMIT ...` for a key range scan.
fn push_range(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    range: KeyRange,
    order: SortOrder,
    limit: Option<usize>,
) {
    match range.lower {
        Bound::Included(v) => {
            builder.push(format!(" AND {column} >= ")).push_bind(v);
        }
        Bound::Excluded(v) => {
            builder.push(format!(" AND {column} > ")).push_bind(v);
        }
        Bound::Unbounded => {}
    }
    match range.upper {
        Bound::Included(v) => {
            builder.push(format!(" AND {column} <= ")).push_bind(v);
        }
        Bound::Excluded(v) => {
            builder.push(format!(" AND {column} < ")).push_bind(v);
        }
        Bound::Unbounded => {}
    }

    builder.push(format!(" ORDER BY {column} "));
    builder.push(match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    });

    if let Some(limit) = limit {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        builder.push(" LIMIT ").push_bind(limit);
    }
}

fn status_json(reading: &Reading) -> Option<serde_json::Value> {
    if reading.status.is_empty() {
        None
    } else {
        serde_json::to_value(&reading.status).ok()
    }
}

/// Postgres-backed [`ReadingStore`].
#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn put_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        self.put_readings(std::slice::from_ref(reading)).await
    }

    async fn put_readings(&self, readings: &[Reading]) -> Result<(), StoreError> {
        if readings.is_empty() {
            return Ok(());
        }

        // A single INSERT .. ON CONFLICT cannot touch the same key twice; keep the
        // last reading per key, matching last-write-wins.
        let mut by_key: BTreeMap<(&str, i64), &Reading> = BTreeMap::new();
        for r in readings {
            by_key.insert((r.device_id.as_str(), r.timestamp), r);
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO water_reading (device_id, ts, liters, milliliters, status, reading_id) ",
        );
        builder.push_values(by_key.into_values(), |mut b, r| {
            b.push_bind(&r.device_id)
                .push_bind(r.timestamp)
                .push_bind(r.liters)
                .push_bind(r.milliliters)
                .push_bind(status_json(r))
                .push_bind(&r.reading_id);
        });
        builder.push(
            " ON CONFLICT (device_id, ts) DO UPDATE SET \
             liters = EXCLUDED.liters, \
             milliliters = EXCLUDED.milliliters, \
             status = EXCLUDED.status, \
             reading_id = EXCLUDED.reading_id",
        );

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn query_readings(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT device_id, ts, liters, milliliters, status, reading_id \
             FROM water_reading WHERE device_id = ",
        );
        builder.push_bind(device_id);
        push_range(&mut builder, "ts", range, order, limit);

        let rows = builder
            .build_query_as::<ReadingRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Reading::try_from).collect()
    }

    async fn put_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO water_reading_per_hour (device_id, fetch_ts, ts, flow_reading, reading_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id, fetch_ts) DO NOTHING
            "#,
        )
        .bind(&snapshot.device_id)
        .bind(snapshot.fetch_timestamp)
        .bind(snapshot.timestamp)
        .bind(snapshot.flow_reading)
        .bind(&snapshot.reading_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_snapshots(
        &self,
        device_id: &str,
        range: KeyRange,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<HourlySnapshot>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT device_id, fetch_ts, ts, flow_reading, reading_id \
             FROM water_reading_per_hour WHERE device_id = ",
        );
        builder.push_bind(device_id);
        push_range(&mut builder, "fetch_ts", range, order, limit);

        let rows = builder
            .build_query_as::<SnapshotRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(HourlySnapshot::from).collect())
    }

    async fn device_ids(&self) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT device_id FROM water_reading ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
