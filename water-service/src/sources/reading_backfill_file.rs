use std::{collections::BTreeMap, path::PathBuf};

use async_stream::try_stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use water_client::Reading;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// NDJSON backfill source for historical readings.
///
/// Each non-blank line is one object with `deviceId`, `timestamp` (epoch
/// seconds), `liters`, `milliliters` and an optional `status` map. Lines that
/// do not parse are counted and skipped.
pub struct ReadingBackfillFileSource {
    path: PathBuf,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackfillReading {
    device_id: String,
    timestamp: i64,
    liters: i64,
    milliliters: i64,
    #[serde(default)]
    status: BTreeMap<String, bool>,
}

impl From<BackfillReading> for Reading {
    fn from(b: BackfillReading) -> Self {
        Reading::new(b.device_id, b.timestamp, b.liters, b.milliliters).with_status(b.status)
    }
}

impl ReadingBackfillFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingBackfillFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        let path = self.path.clone();
        let s = try_stream! {
            let file = File::open(&path).await.map_err(|e| {
                let path = path.display();
                PipelineError::Source(format!("failed to open backfill file {path}: {e}"))
            })?;
            let mut lines = BufReader::new(file).lines();
            let mut line_no: u64 = 0;

            while let Some(line) = lines.next_line().await.map_err(|e| {
                PipelineError::Source(format!("failed to read backfill line: {e}"))
            })? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<BackfillReading>(&line) {
                    Ok(parsed) => {
                        yield Envelope::new(Reading::from(parsed));
                    }
                    Err(e) => {
                        metrics::counter!("backfill_reading_parse_errors_total").increment(1);
                        tracing::warn!(
                            line = line_no,
                            error = %e,
                            "skipping unparsable backfill line"
                        );
                    }
                }
            }
        };

        Box::pin(s)
    }
}
