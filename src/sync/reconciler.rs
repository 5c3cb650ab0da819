use log::debug;

use crate::db::models::AvatarRecord;
use crate::db::SyncStore;
use crate::ledger::Ledger;

/// Per-token outcome of one reconciliation attempt.
///
/// Soft outcomes (`NotMinted`, `ResolutionFailed`) never reach the batch
/// error list; `Failed` is recorded and iteration continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Mirror row inserted or refreshed.
    Updated,
    /// The ledger reports the sentinel fid 0: slot never minted.
    NotMinted,
    /// The fid mapping itself could not be read; the token is picked up again
    /// by a later invocation instead of polluting the error list.
    ResolutionFailed(String),
    /// Owner/metadata resolution or persistence failed for this token only.
    Failed(String),
}

/// Reconcile a single token id from the ledger into the mirror table.
///
/// Idempotent per fid: an existing row is refreshed in place, a missing one
/// is inserted. Repeated runs over the same range never create duplicates.
pub async fn reconcile_token<L: Ledger, S: SyncStore>(
    ledger: &L,
    store: &S,
    token_id: u64,
) -> ReconcileOutcome {
    let fid = match ledger.fid_of(token_id).await {
        Ok(0) => return ReconcileOutcome::NotMinted,
        Ok(fid) => fid,
        Err(e) => {
            debug!("Could not resolve fid for token {}: {:#}", token_id, e);
            return ReconcileOutcome::ResolutionFailed(format!("token {}: {:#}", token_id, e));
        },
    };

    let owner_address = match ledger.owner_of(token_id).await {
        Ok(owner) => owner,
        Err(e) => {
            return ReconcileOutcome::Failed(format!("fid {}: failed to resolve owner: {:#}", fid, e))
        },
    };

    let metadata = match ledger.avatar_of(token_id).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return ReconcileOutcome::Failed(format!(
                "fid {}: failed to resolve metadata: {:#}",
                fid, e
            ))
        },
    };

    let existing = match store.find_avatar_by_fid(fid).await {
        Ok(row) => row,
        Err(e) => {
            return ReconcileOutcome::Failed(format!("fid {}: mirror lookup failed: {:#}", fid, e))
        },
    };

    let result = match existing {
        Some(mut record) => {
            record.apply(token_id, owner_address, &metadata);
            store.update_avatar(&record).await
        },
        None => {
            let record = AvatarRecord::new(fid, token_id, owner_address, &metadata);
            store.insert_avatar(&record).await
        },
    };

    match result {
        Ok(()) => ReconcileOutcome::Updated,
        Err(e) => {
            ReconcileOutcome::Failed(format!("fid {}: failed to persist mirror row: {:#}", fid, e))
        },
    }
}
