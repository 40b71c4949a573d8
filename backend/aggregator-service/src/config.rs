/// Configuration management for aggregator-service
///
/// Loads configuration from environment variables (and `.env`) with defaults.
use idempotent_ingest::{PipelineConfig, StoreOptions, DEFAULT_QUEUE_CAPACITY};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_queue_capacity")]
    pub intake_queue_capacity: usize,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_busy_timeout_secs")]
    pub db_busy_timeout_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/aggregator.db")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_drain_timeout_secs() -> u64 {
    5
}

fn default_db_max_connections() -> u32 {
    4
}

fn default_db_busy_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            path: self.db_path.clone(),
            max_connections: self.db_max_connections,
            busy_timeout: Duration::from_secs(self.db_busy_timeout_secs),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.intake_queue_capacity,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }
}
