use std::future::Future;

use anyhow::Result;

mod reader;
pub mod retry;

pub use reader::AvatarLedger;

/// Metadata bundle read from the avatar contract for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarMetadata {
    pub image_url: String,
    pub style: String,
    pub minted_at: u64,
}

/// Read boundary over the avatar NFT contract.
///
/// The token-id space is dense, starting at 1. `fid_of` returns 0 for a slot
/// that was never minted; callers must treat that as a skip, not an error.
pub trait Ledger: Send + Sync {
    fn total_supply(&self) -> impl Future<Output = Result<u64>> + Send;
    fn fid_of(&self, token_id: u64) -> impl Future<Output = Result<u64>> + Send;
    fn owner_of(&self, token_id: u64) -> impl Future<Output = Result<String>> + Send;
    fn avatar_of(&self, token_id: u64) -> impl Future<Output = Result<AvatarMetadata>> + Send;
}
