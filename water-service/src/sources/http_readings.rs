use std::{collections::BTreeMap, sync::Arc};

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use water_client::Reading;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Device ids arrive either as JSON strings or bare numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DeviceIdField {
    Text(String),
    Number(serde_json::Number),
}

impl DeviceIdField {
    fn into_string(self) -> String {
        match self {
            DeviceIdField::Text(s) => s.trim().to_string(),
            DeviceIdField::Number(n) => n.to_string(),
        }
    }
}

/// Body of `POST /readings` as sent by meters.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadingSubmission {
    #[serde(rename = "DeviceID")]
    device_id: DeviceIdField,
    #[serde(rename = "Liters")]
    liters: f64,
    #[serde(rename = "Milliliters")]
    milliliters: f64,
    #[serde(rename = "Status", default)]
    status: Option<BTreeMap<String, bool>>,
}

fn truncate_count(field: &str, value: f64) -> Result<i64, PipelineError> {
    if !value.is_finite() {
        return Err(PipelineError::Source(format!("{field} must be a finite number")));
    }
    Ok(value.trunc() as i64)
}

impl ReadingSubmission {
    /// Build a reading observed at `timestamp` (server clock, epoch seconds).
    pub fn into_reading(self, timestamp: i64) -> Result<Reading, PipelineError> {
        let liters = truncate_count("Liters", self.liters)?;
        let milliliters = truncate_count("Milliliters", self.milliliters)?;
        let reading = Reading::new(self.device_id.into_string(), timestamp, liters, milliliters);
        Ok(match self.status {
            Some(status) => reading.with_status(status),
            None => reading,
        })
    }
}

/// Sending half of the HTTP ingestion channel, held by the API state.
#[derive(Clone)]
pub struct ReadingIngress {
    tx: mpsc::Sender<Envelope<Reading>>,
}

impl ReadingIngress {
    pub async fn submit(&self, reading: Reading) -> Result<(), PipelineError> {
        self.tx
            .send(Envelope::new(reading))
            .await
            .map_err(|_| PipelineError::Source("ingestion pipeline is not running".to_string()))
    }
}

/// Receiving half: readings pushed through a [`ReadingIngress`].
#[derive(Clone)]
pub struct HttpReadingSource {
    receiver: Arc<Mutex<Option<mpsc::Receiver<Envelope<Reading>>>>>,
}

impl HttpReadingSource {
    pub fn new(channel_capacity: usize) -> (Self, ReadingIngress) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let source = Self {
            receiver: Arc::new(Mutex::new(Some(rx))),
        };
        (source, ReadingIngress { tx })
    }
}

#[async_trait::async_trait]
impl Source<Reading> for HttpReadingSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match self.receiver.lock().await.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "HttpReadingSource stream already taken; only one consumer supported"
                        .to_string(),
                ))
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_device_id_and_fractional_counts_are_coerced() {
        let body = serde_json::json!({"DeviceID": 4021, "Liters": 12.9, "Milliliters": 250.7});
        let submission: ReadingSubmission = serde_json::from_value(body).unwrap();
        let reading = submission.into_reading(1_700_000_000).unwrap();

        assert_eq!(reading.device_id, "4021");
        assert_eq!(reading.liters, 12);
        assert_eq!(reading.milliliters, 250);
        assert_eq!(reading.reading_id, "4021-1700000000");
        assert!(reading.status.is_empty());
    }

    #[test]
    fn status_map_is_kept() {
        let body = serde_json::json!({
            "DeviceID": "D1",
            "Liters": 1,
            "Milliliters": 0,
            "Status": {"valveOpen": true, "lowBattery": false}
        });
        let submission: ReadingSubmission = serde_json::from_value(body).unwrap();
        let reading = submission.into_reading(1).unwrap();
        assert_eq!(reading.status.get("valveOpen"), Some(&true));
        assert_eq!(reading.status.len(), 2);
    }

    #[test]
    fn missing_liters_fails_to_parse() {
        let body = serde_json::json!({"DeviceID": "D1", "Milliliters": 0});
        assert!(serde_json::from_value::<ReadingSubmission>(body).is_err());
    }

    #[tokio::test]
    async fn submitted_readings_come_out_of_the_stream() {
        let (source, ingress) = HttpReadingSource::new(4);
        ingress.submit(Reading::new("D1", 5, 1, 0)).await.unwrap();
        drop(ingress);

        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().payload.timestamp, 5);

        let again: Vec<_> = source.stream().await.collect().await;
        assert!(matches!(again.as_slice(), [Err(PipelineError::Source(_))]));
    }
}
