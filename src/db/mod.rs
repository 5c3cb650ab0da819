use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Settings;

pub mod models;
pub mod postgres;

pub use models::{AvatarRecord, SyncCheckpoint};
pub use postgres::PostgresClient;

/// Persistence boundary for the sync pipeline.
///
/// Covers the three tables the pipeline owns: avatar mirror rows, the
/// checkpoint cursor and the invocation lease. "Row not found" is an
/// `Ok(None)`, distinct from a storage fault.
pub trait SyncStore: Send + Sync {
    fn load_checkpoint(
        &self,
        kind: &str,
    ) -> impl Future<Output = Result<Option<SyncCheckpoint>>> + Send;

    fn save_checkpoint(
        &self,
        kind: &str,
        last_processed_id: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Take the invocation lease. Returns false when another live holder has it.
    fn try_acquire_lease(
        &self,
        kind: &str,
        holder: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn release_lease(&self, kind: &str, holder: &str) -> impl Future<Output = Result<()>> + Send;

    /// Most recently updated row for a fid, if any.
    fn find_avatar_by_fid(
        &self,
        fid: u64,
    ) -> impl Future<Output = Result<Option<AvatarRecord>>> + Send;

    fn insert_avatar(&self, record: &AvatarRecord) -> impl Future<Output = Result<()>> + Send;

    fn update_avatar(&self, record: &AvatarRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Database handle for the sync pipeline.
///
/// PostgreSQL only: mirror records, checkpoints and the lease are all
/// relational, low-volume data.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    pub async fn new(settings: &Settings) -> Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;

        // Run migrations
        postgres.migrate().await?;

        Ok(Self {
            postgres: Arc::new(postgres),
        })
    }
}
