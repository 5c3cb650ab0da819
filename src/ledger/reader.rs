use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, ProviderBuilder};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::abis::avatar::IAvatarNft;
use crate::config::LedgerSettings;
use crate::ledger::retry::{with_retry, RetryPolicy};
use crate::ledger::{AvatarMetadata, Ledger};

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry-wrapped reader over the avatar NFT contract.
///
/// Every read goes through `with_retry`, so hosted-RPC rate limiting surfaces
/// as backoff instead of a failed invocation. Reads are strictly sequential
/// by design: parallel calls would only amplify throttling.
#[derive(Clone)]
pub struct AvatarLedger {
    provider: DynProvider,
    contract_address: Address,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl AvatarLedger {
    pub fn new(settings: &LedgerSettings, cancel: CancellationToken) -> Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;
        let contract_address: Address = settings
            .contract_address
            .parse()
            .context("Invalid avatar contract address")?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        Ok(Self {
            provider,
            contract_address,
            retry: RetryPolicy {
                max_attempts: settings.max_retries,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            },
            cancel,
        })
    }
}

impl Ledger for AvatarLedger {
    async fn total_supply(&self) -> Result<u64> {
        let contract = IAvatarNft::new(self.contract_address, &self.provider);

        with_retry(&self.retry, &self.cancel, || async {
            let supply = tokio::time::timeout(RPC_CALL_TIMEOUT, contract.totalSupply().call())
                .await
                .context("totalSupply timed out")?
                .context("totalSupply call failed")?;
            Ok(supply.saturating_to::<u64>())
        })
        .await
    }

    async fn fid_of(&self, token_id: u64) -> Result<u64> {
        let contract = IAvatarNft::new(self.contract_address, &self.provider);

        with_retry(&self.retry, &self.cancel, || async {
            let fid = tokio::time::timeout(
                RPC_CALL_TIMEOUT,
                contract.fidOf(U256::from(token_id)).call(),
            )
            .await
            .context("fidOf timed out")?
            .context("fidOf call failed")?;
            Ok(fid.saturating_to::<u64>())
        })
        .await
    }

    async fn owner_of(&self, token_id: u64) -> Result<String> {
        let contract = IAvatarNft::new(self.contract_address, &self.provider);

        with_retry(&self.retry, &self.cancel, || async {
            let owner = tokio::time::timeout(
                RPC_CALL_TIMEOUT,
                contract.ownerOf(U256::from(token_id)).call(),
            )
            .await
            .context("ownerOf timed out")?
            .context("ownerOf call failed")?;
            // Lowercase hex for consistent comparisons against stored rows
            Ok(format!("{owner:#x}"))
        })
        .await
    }

    async fn avatar_of(&self, token_id: u64) -> Result<AvatarMetadata> {
        let contract = IAvatarNft::new(self.contract_address, &self.provider);

        with_retry(&self.retry, &self.cancel, || async {
            let avatar = tokio::time::timeout(
                RPC_CALL_TIMEOUT,
                contract.avatarOf(U256::from(token_id)).call(),
            )
            .await
            .context("avatarOf timed out")?
            .context("avatarOf call failed")?;

            Ok(AvatarMetadata {
                image_url: avatar.imageUrl,
                style: avatar.style,
                minted_at: avatar.mintedAt,
            })
        })
        .await
    }
}
