use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use water_client::Reading;
use water_service::{
    api::{self, AppState},
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    rollup::RollupService,
    sinks::{FailurePolicy, ReadingStoreSink},
    sources::HttpReadingSource,
    store::open_store,
    transform, ConsumptionService,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = open_store(&cfg.store).await?;
    let zone = cfg.calendar.utc_offset;
    let cancel = CancellationToken::new();

    let rollup = cfg.rollup.enabled.then(|| {
        RollupService::new(store.clone(), zone, Duration::from_secs(cfg.rollup.period_secs))
            .start(cancel.child_token())
    });

    // Ingestion: HTTP handler -> channel -> validation -> store.
    let (source, ingress) = HttpReadingSource::new(cfg.ingest.channel_capacity);
    let sink_cfg = &cfg.ingest.sink;
    let pipeline: Pipeline<_, Reading, _> = Pipeline {
        source,
        transforms: vec![Arc::new(transform::ReadingValidation)],
        sink: ReadingStoreSink::new(
            store.clone(),
            sink_cfg.batch_size,
            sink_cfg.max_retries,
            Duration::from_millis(sink_cfg.retry_backoff_ms),
        )
        .with_flush_interval(Duration::from_millis(sink_cfg.flush_interval_ms))
        .with_failure_policy(FailurePolicy::DropBatch),
    };
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = pipeline.run().await {
            tracing::error!(error = %e, "ingestion pipeline stopped");
        }
    });

    let consumption = Arc::new(ConsumptionService::new(
        store.clone(),
        zone,
        cfg.consumption.baseline,
        cfg.store.query_limit,
    ));
    let app = api::router(AppState {
        store,
        consumption,
        ingress,
    });

    let listener = tokio::net::TcpListener::bind(&cfg.http.bind_addr).await?;
    tracing::info!(
        addr = %cfg.http.bind_addr,
        utc_offset = %zone,
        baseline = ?cfg.consumption.baseline,
        "water service listening"
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
        shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    if let Some(handle) = rollup {
        handle.stop().await;
    }
    // The router owned the last ingress sender, so the pipeline drains and ends.
    if let Err(e) = ingest_task.await {
        tracing::error!(error = %e, "ingestion task panicked");
    }

    tracing::info!("water service stopped");
    Ok(())
}
