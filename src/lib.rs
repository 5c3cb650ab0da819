pub mod abis;
pub mod config;
pub mod db;
pub mod ledger;
pub mod sync;

pub use config::Settings;
pub use db::Database;
pub use ledger::AvatarLedger;
pub use sync::{SyncDriver, SyncEvent, SyncOptions};
