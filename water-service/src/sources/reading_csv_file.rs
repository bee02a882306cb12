use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use water_client::Reading;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV backfill source for historical readings.
///
/// Expected header columns (by name): `deviceId`, `timestamp` (epoch
/// seconds), `liters`, `milliliters`. Extra columns are ignored. Rows that do
/// not parse are counted and skipped.
pub struct ReadingCsvFileSource {
    path: PathBuf,
}

impl ReadingCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn record_to_reading(
    record: &StringRecord,
    headers: &StringRecord,
) -> Result<Reading, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };
    let int = |name: &str| -> Result<i64, PipelineError> {
        let raw = get(name)?;
        raw.parse()
            .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
    };

    let device_id = get("deviceId")?;
    if device_id.is_empty() {
        return Err(PipelineError::Source("empty deviceId".to_string()));
    }

    Ok(Reading::new(
        device_id,
        int("timestamp")?,
        int("liters")?,
        int("milliliters")?,
    ))
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        // Blocking CSV reads inside one task; backfills are offline jobs.
        let path = self.path.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path).map_err(|e| {
                PipelineError::Source(format!("failed to open CSV file {}: {e}", path.display()))
            })?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for (idx, result) in rdr.records().enumerate() {
                let parsed = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_reading(&record, &headers));

                match parsed {
                    Ok(reading) => {
                        yield Envelope::new(reading);
                    }
                    Err(e) => {
                        metrics::counter!("reading_csv_parse_errors_total").increment(1);
                        tracing::warn!(row = idx + 1, error = %e, "skipping unparsable CSV row");
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn parses_columns_by_name() {
        let headers = record(&["timestamp", "deviceId", "milliliters", "liters", "note"]);
        let row = record(&["1700000000", " D9 ", "125", "40", "x"]);
        let reading = record_to_reading(&row, &headers).unwrap();
        assert_eq!(reading.device_id, "D9");
        assert_eq!(reading.timestamp, 1_700_000_000);
        assert_eq!(reading.liters, 40);
        assert_eq!(reading.milliliters, 125);
    }

    #[test]
    fn rejects_non_numeric_values() {
        let headers = record(&["deviceId", "timestamp", "liters", "milliliters"]);
        assert!(record_to_reading(&record(&["D1", "yesterday", "1", "0"]), &headers).is_err());
        assert!(record_to_reading(&record(&["", "1", "1", "0"]), &headers).is_err());
    }

    #[tokio::test]
    async fn bad_rows_are_skipped() {
        let path = std::env::temp_dir().join(format!("water-backfill-{}.csv", std::process::id()));
        std::fs::write(
            &path,
            concat!(
                "deviceId,timestamp,liters,milliliters\n",
                "D1,1700000000,1,0\nD1,oops,2,0\nD1,1700003600,3,500\n",
            ),
        )
        .unwrap();

        let items: Vec<_> = ReadingCsvFileSource::new(&path).stream().await.collect().await;
        std::fs::remove_file(&path).ok();

        let ts: Vec<i64> = items.into_iter().map(|r| r.unwrap().payload.timestamp).collect();
        assert_eq!(ts, vec![1_700_000_000, 1_700_003_600]);
    }
}
