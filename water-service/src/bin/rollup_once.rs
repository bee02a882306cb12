use anyhow::Result;
use water_service::{
    config::AppConfig,
    observability,
    rollup::{now_epoch, run_tick},
    store::open_store,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    cfg.store.ensure_persistent()?;
    let store = open_store(&cfg.store).await?;

    let outcome = run_tick(store.as_ref(), &cfg.calendar.utc_offset, now_epoch()).await?;
    println!(
        "written={} skipped={} failed={}",
        outcome.written, outcome.skipped, outcome.failed
    );

    Ok(())
}
