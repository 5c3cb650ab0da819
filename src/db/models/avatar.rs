use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::AvatarMetadata;

/// Mirror of one minted avatar NFT (PostgreSQL).
///
/// Keyed by `fid` (the owner's Farcaster id), not by token id: the fid is the
/// stable identity the rest of the product looks rows up by. Rows are created
/// the first time a fid is seen with a non-zero token mapping and refreshed on
/// every later reconciliation; this pipeline never deletes them.
#[derive(Debug, Clone, Serialize)]
pub struct AvatarRecord {
    pub fid: u64,
    pub token_id: u64,
    pub owner_address: String,
    pub image_url: String,
    pub style: String,
    pub minted: bool,
    pub minted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvatarRecord {
    pub fn new(fid: u64, token_id: u64, owner_address: String, metadata: &AvatarMetadata) -> Self {
        let now = Utc::now();
        Self {
            fid,
            token_id,
            // Always lowercase addresses for consistent comparisons
            owner_address: owner_address.to_lowercase(),
            image_url: metadata.image_url.clone(),
            style: metadata.style.clone(),
            minted: true,
            minted_at: DateTime::from_timestamp(metadata.minted_at as i64, 0),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the ledger-derived fields on an existing row.
    pub fn apply(&mut self, token_id: u64, owner_address: String, metadata: &AvatarMetadata) {
        self.token_id = token_id;
        self.owner_address = owner_address.to_lowercase();
        self.image_url = metadata.image_url.clone();
        self.style = metadata.style.clone();
        self.minted = true;
        self.minted_at = DateTime::from_timestamp(metadata.minted_at as i64, 0);
        self.updated_at = Utc::now();
    }
}
