mod config;

pub use config::{LedgerSettings, PostgresSettings, Settings, SyncSettings};
