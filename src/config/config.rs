use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Avatar mirror records
/// - Sync checkpoints
/// - The invocation lease
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Avatar NFT contract and RPC configuration.
///
/// The retry settings cover every contract read; rate limits of hosted
/// RPC providers are the main constraint on sync throughput.
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    pub rpc_url: String,
    pub contract_address: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

/// Sync pipeline defaults, overridable per invocation from the CLI.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_batch_size() -> u64 {
    100
}

fn default_batch_delay_ms() -> u64 {
    3000
}

fn default_lease_ttl_secs() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
