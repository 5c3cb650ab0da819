use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

/// PostgreSQL client with connection pooling.
///
/// Provides async database operations for the avatar mirror table, sync
/// checkpoints and the invocation lease. Uses `deadpool-postgres` for
/// connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        const MAX_CONNECT_ATTEMPTS: u32 = 3;
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..MAX_CONNECT_ATTEMPTS {
            let mut pg_config = tokio_postgres::Config::new();
            pg_config
                .host(&settings.host)
                .port(settings.port)
                .user(&settings.user)
                .password(&settings.password)
                .dbname(&settings.database);

            let mgr_config = ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            };

            let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
            let pool = Pool::builder(mgr)
                .max_size(settings.pool_size)
                .build()
                .context("Failed to create PostgreSQL connection pool")?;

            // Test the connection
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self { pool });
                },
                Err(e) => {
                    last_error = Some(anyhow::anyhow!(e));

                    if attempt + 1 < MAX_CONNECT_ATTEMPTS {
                        let delay = std::time::Duration::from_millis(100 * 2_u64.pow(attempt + 1));
                        warn!(
                            "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                            attempt + 1,
                            MAX_CONNECT_ATTEMPTS,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(anyhow::anyhow!(
            "Failed to connect to PostgreSQL after {} attempts: {}",
            MAX_CONNECT_ATTEMPTS,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        ))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        client
            .batch_execute(&schema)
            .await
            .context("Failed to apply schema/postgres.sql")?;

        info!("PostgreSQL schema applied successfully");
        Ok(())
    }
}
