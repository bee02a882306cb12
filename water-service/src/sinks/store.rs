use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use water_client::{Reading, ReadingStore};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// What to do with a batch that still fails after every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the error and stop consuming.
    Abort,
    /// Log and count the dropped batch, then keep consuming.
    DropBatch,
}

/// Writes validated readings to a [`ReadingStore`] in batches.
///
/// A batch is written when it reaches `batch_size`, when `flush_interval`
/// elapses with readings pending, and when the input ends.
pub struct ReadingStoreSink {
    store: Arc<dyn ReadingStore>,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    flush_interval: Duration,
    on_failure: FailurePolicy,
}

impl ReadingStoreSink {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
            flush_interval: Duration::from_millis(500),
            on_failure: FailurePolicy::Abort,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    async fn flush_batch(&self, batch: &[Envelope<Reading>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let readings: Vec<Reading> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match self.store.put_readings(&readings).await {
                Ok(()) => {
                    metrics::counter!("readings_ingested_total").increment(readings.len() as u64);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("ingest_end_to_end_latency_seconds")
                                .record(dur.as_secs_f64());
                        }
                    }

                    tracing::debug!(count = readings.len(), "flushed reading batch");
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "reading store flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "reading store flush failed, giving up");
                    metrics::counter!("reading_store_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    /// Flush and clear `buffer`, applying the failure policy.
    async fn drain(&self, buffer: &mut Vec<Envelope<Reading>>) -> Result<(), PipelineError> {
        let result = self.flush_batch(buffer).await;
        let count = buffer.len();
        buffer.clear();

        match (result, self.on_failure) {
            (Ok(()), _) => Ok(()),
            (Err(e), FailurePolicy::Abort) => Err(e),
            (Err(e), FailurePolicy::DropBatch) => {
                metrics::counter!("readings_dropped_total").increment(count as u64);
                tracing::error!(error = %e, count, "dropped reading batch after retries");
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for ReadingStoreSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<Reading>> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                item = input.next() => {
                    let env = match item {
                        None => break,
                        Some(Ok(env)) => env,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "dropping rejected reading");
                            continue;
                        }
                    };

                    buffer.push(env);
                    if buffer.len() >= self.batch_size {
                        self.drain(&mut buffer).await?;
                    }
                }
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.drain(&mut buffer).await?;
                    }
                }
            }
        }

        self.drain(&mut buffer).await
    }
}
