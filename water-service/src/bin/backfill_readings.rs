use anyhow::{bail, Result};
use std::{env, path::Path, sync::Arc, time::Duration};
use water_client::Reading;
use water_service::{
    config::AppConfig,
    observability,
    pipeline::{EnvelopeStream, Pipeline, Source},
    sinks::ReadingStoreSink,
    sources::{ReadingBackfillFileSource, ReadingCsvFileSource},
    store::open_store,
    transform,
};

enum BackfillSource {
    Ndjson(ReadingBackfillFileSource),
    Csv(ReadingCsvFileSource),
}

#[async_trait::async_trait]
impl Source<Reading> for BackfillSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        match self {
            Self::Ndjson(s) => s.stream().await,
            Self::Csv(s) => s.stream().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <file.ndjson|file.csv>");
    }
    let file_path = Path::new(&args[1]);

    // WATER_SERVICE_CONFIG can point at a backfill-specific file.
    let cfg = AppConfig::load()?;
    cfg.store.ensure_persistent()?;
    let store = open_store(&cfg.store).await?;

    let source = match file_path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => {
            BackfillSource::Csv(ReadingCsvFileSource::new(file_path))
        }
        _ => BackfillSource::Ndjson(ReadingBackfillFileSource::new(file_path)),
    };

    let sink_cfg = &cfg.ingest.sink;
    let pipeline: Pipeline<_, Reading, _> = Pipeline {
        source,
        transforms: vec![Arc::new(transform::ReadingValidation)],
        sink: ReadingStoreSink::new(
            store,
            sink_cfg.batch_size,
            sink_cfg.max_retries,
            Duration::from_millis(sink_cfg.retry_backoff_ms),
        )
        .with_flush_interval(Duration::from_millis(sink_cfg.flush_interval_ms)),
    };

    pipeline.run().await?;
    tracing::info!(path = %file_path.display(), "backfill complete");

    Ok(())
}
