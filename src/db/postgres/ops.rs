use std::time::Duration;

use log::error;

use crate::db::models::{AvatarRecord, SyncCheckpoint};
use crate::db::postgres::PostgresClient;
use crate::db::SyncStore;

impl SyncStore for PostgresClient {
    // ==================== SYNC CHECKPOINT ====================

    async fn load_checkpoint(&self, kind: &str) -> anyhow::Result<Option<SyncCheckpoint>> {
        let client = self.pool.get().await?;
        let query = "SELECT kind, last_processed_id, created_at, updated_at FROM sync.checkpoints WHERE kind = $1";

        let row = client.query_opt(query, &[&kind]).await?;

        Ok(row.map(|r| SyncCheckpoint {
            kind: r.get("kind"),
            last_processed_id: r.get::<_, i64>("last_processed_id") as u64,
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save_checkpoint(&self, kind: &str, last_processed_id: u64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        // Atomic replace keyed by kind: a concurrent reader always observes
        // some cursor, never a transient "no checkpoint" window.
        let query = r#"
            INSERT INTO sync.checkpoints (kind, last_processed_id, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (kind) DO UPDATE SET
                last_processed_id = EXCLUDED.last_processed_id,
                updated_at = NOW()
        "#;

        client
            .execute(query, &[&kind, &(last_processed_id as i64)])
            .await
            .map_err(|e| {
                error!(
                    "Failed to save checkpoint {} at token {}: {:?}",
                    kind, last_processed_id, e
                );
                e
            })?;

        Ok(())
    }

    // ==================== INVOCATION LEASE ====================

    async fn try_acquire_lease(
        &self,
        kind: &str,
        holder: &str,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;
        // Takes the lease when the slot is free, expired, or already ours.
        let query = r#"
            INSERT INTO sync.leases (kind, holder, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (kind) DO UPDATE SET
                holder = EXCLUDED.holder,
                expires_at = EXCLUDED.expires_at
            WHERE sync.leases.holder = EXCLUDED.holder
               OR sync.leases.expires_at < NOW()
        "#;

        let affected = client
            .execute(query, &[&kind, &holder, &ttl.as_secs_f64()])
            .await?;

        Ok(affected > 0)
    }

    async fn release_lease(&self, kind: &str, holder: &str) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = "DELETE FROM sync.leases WHERE kind = $1 AND holder = $2";

        client.execute(query, &[&kind, &holder]).await?;

        Ok(())
    }

    // ==================== AVATAR MIRROR ====================

    async fn find_avatar_by_fid(&self, fid: u64) -> anyhow::Result<Option<AvatarRecord>> {
        let client = self.pool.get().await?;
        // Most recent row wins if earlier runs ever left duplicates behind.
        let query = r#"
            SELECT fid, token_id, owner_address, image_url, style, minted,
                   minted_at, created_at, updated_at
            FROM sync.avatars
            WHERE fid = $1
            ORDER BY updated_at DESC
            LIMIT 1
        "#;

        let row = client.query_opt(query, &[&(fid as i64)]).await?;

        Ok(row.map(|r| row_to_avatar(&r)))
    }

    async fn insert_avatar(&self, record: &AvatarRecord) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO sync.avatars (
                fid, token_id, owner_address, image_url, style, minted,
                minted_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;

        client
            .execute(
                query,
                &[
                    &(record.fid as i64),
                    &(record.token_id as i64),
                    &record.owner_address,
                    &record.image_url,
                    &record.style,
                    &record.minted,
                    &record.minted_at,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to insert avatar for fid {}: {:?}", record.fid, e);
                e
            })?;

        Ok(())
    }

    async fn update_avatar(&self, record: &AvatarRecord) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE sync.avatars SET
                token_id = $2,
                owner_address = $3,
                image_url = $4,
                style = $5,
                minted = $6,
                minted_at = $7,
                updated_at = $8
            WHERE fid = $1
        "#;

        client
            .execute(
                query,
                &[
                    &(record.fid as i64),
                    &(record.token_id as i64),
                    &record.owner_address,
                    &record.image_url,
                    &record.style,
                    &record.minted,
                    &record.minted_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to update avatar for fid {}: {:?}", record.fid, e);
                e
            })?;

        Ok(())
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_avatar(row: &tokio_postgres::Row) -> AvatarRecord {
    // Lowercase addresses for consistent comparisons
    let owner_address: String = row.get("owner_address");
    AvatarRecord {
        fid: row.get::<_, i64>("fid") as u64,
        token_id: row.get::<_, i64>("token_id") as u64,
        owner_address: owner_address.to_lowercase(),
        image_url: row.get("image_url"),
        style: row.get("style"),
        minted: row.get("minted"),
        minted_at: row.get("minted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
