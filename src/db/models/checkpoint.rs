use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync progress checkpoint (PostgreSQL).
///
/// Tracks the last token id successfully reconciled for each checkpoint kind.
/// Used to resume the next bounded invocation without reprocessing the whole
/// token-id space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub kind: String,
    pub last_processed_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(kind: impl Into<String>, last_processed_id: u64) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.into(),
            last_processed_id,
            created_at: now,
            updated_at: now,
        }
    }
}
