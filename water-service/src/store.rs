use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use water_client::{db::PgReadingStore, MemoryStore, ReadingStore};

use crate::config::{StoreConfig, StoreKind};

/// Open the configured reading store, creating Postgres tables if needed.
pub async fn open_store(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn ReadingStore>> {
    match cfg.kind {
        StoreKind::Memory => {
            tracing::info!("using in-memory reading store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let uri = cfg
                .uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.uri is required for postgres"))?;
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(uri)
                .await?;
            let store = PgReadingStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!(
                max_connections = cfg.max_connections,
                "connected to postgres reading store"
            );
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_opens_without_uri() {
        let cfg = StoreConfig {
            kind: StoreKind::Memory,
            uri: None,
            max_connections: 1,
            query_limit: 10,
        };
        let store = open_store(&cfg).await.unwrap();
        assert!(store.device_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn postgres_without_uri_fails() {
        let cfg = StoreConfig {
            kind: StoreKind::Postgres,
            uri: None,
            max_connections: 1,
            query_limit: 10,
        };
        assert!(open_store(&cfg).await.is_err());
    }
}
