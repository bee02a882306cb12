use serde::Deserialize;
use std::fs;

use crate::{calendar::ReferenceZone, consumption::BaselineMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Maximum rows returned by one range query.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

impl StoreConfig {
    /// One-shot tools write through a store that must outlive the process.
    pub fn ensure_persistent(&self) -> anyhow::Result<()> {
        if self.kind == StoreKind::Memory {
            anyhow::bail!(
                "store.kind = \"memory\" is discarded when the process exits; configure postgres"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Pending readings are written at least this often.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_backoff_ms: 200,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            sink: SinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarConfig {
    /// Reference zone offset such as `+05:30`.
    #[serde(default)]
    pub utc_offset: ReferenceZone,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumptionConfig {
    #[serde(default)]
    pub baseline: BaselineMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    pub enabled: bool,
    pub period_secs: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub consumption: ConsumptionConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_query_limit() -> usize {
    10_000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_flush_interval_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("WATER_SERVICE_CONFIG")
            .unwrap_or_else(|_| "water-service.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.store.kind == StoreKind::Postgres && cfg.store.uri.is_none() {
            anyhow::bail!("store.uri is required when store.kind = \"postgres\"");
        }
        Ok(cfg)
    }
}
