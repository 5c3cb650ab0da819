use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::db::SyncStore;
use crate::ledger::Ledger;
use crate::sync::events::{ProgressData, SyncEvent, SyncSummary};
use crate::sync::reconciler::{reconcile_token, ReconcileOutcome};

/// Checkpoint and lease kind for the avatar ownership sync cursor.
pub const CHECKPOINT_KIND: &str = "avatar-sync-progress";

/// Tokens per invocation when the caller passes 0.
const DEFAULT_BATCH_SIZE: u64 = 100;

/// Hard cap on tokens per invocation; keeps one run inside the host's
/// wall-clock limit so the caller can always re-invoke for the remainder.
const MAX_BATCH_SIZE: u64 = 500;

/// Checkpoint cadence: every token id divisible by this.
const CHECKPOINT_EVERY: u64 = 10;

/// Progress event cadence, by processed count.
const PROGRESS_EVERY: u64 = 5;

/// Cap on recorded error strings; overflow is folded into one tail entry.
const MAX_RECORDED_ERRORS: usize = 25;

/// Caller-supplied knobs for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Tokens to process this invocation; 0 selects the default of 100,
    /// anything else is clamped to [1, 500].
    pub batch_size: u64,
    /// First token id to process; 0 resumes from the stored checkpoint.
    pub start_token_id: u64,
    /// Cool-down before signaling when more work remains, so caller-driven
    /// repeated invocations don't hammer the ledger RPC.
    pub batch_delay_ms: u64,
    /// How long the invocation lease stays valid.
    pub lease_ttl: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 0,
            start_token_id: 0,
            batch_delay_ms: 3000,
            lease_ttl: Duration::from_secs(300),
        }
    }
}

/// Counters accumulated across one batch.
#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    updated: u64,
    skipped: u64,
    not_minted: u64,
    errors: Vec<String>,
    errors_dropped: u64,
}

impl Counters {
    fn record_error(&mut self, message: String) {
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message);
        } else {
            self.errors_dropped += 1;
        }
    }

    fn error_count(&self) -> u64 {
        self.errors.len() as u64 + self.errors_dropped
    }

    fn into_summary(self, total_supply: u64) -> SyncSummary {
        let dropped = self.errors_dropped;
        let mut errors = self.errors;
        if dropped > 0 {
            errors.push(format!("{} more errors omitted", dropped));
        }
        SyncSummary {
            total_supply,
            processed: self.processed,
            updated: self.updated,
            skipped: self.skipped,
            not_minted: self.not_minted,
            errors,
        }
    }
}

/// Drives one bounded sync invocation.
///
/// Resolves the starting cursor, reconciles a contiguous token-id range in
/// strictly increasing order, checkpoints progress every few tokens and
/// streams lifecycle events to the caller. One invocation processes at most
/// `batch_size` tokens; the terminal event tells the caller whether to
/// re-invoke for the remainder.
pub struct SyncDriver<L, S> {
    ledger: L,
    store: S,
    events: mpsc::Sender<SyncEvent>,
    options: SyncOptions,
}

impl<L: Ledger, S: SyncStore> SyncDriver<L, S> {
    pub fn new(ledger: L, store: S, events: mpsc::Sender<SyncEvent>, options: SyncOptions) -> Self {
        Self {
            ledger,
            store,
            events,
            options,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let holder = format!("castsync-{}", std::process::id());

        match self
            .store
            .try_acquire_lease(CHECKPOINT_KIND, &holder, self.options.lease_ttl)
            .await
        {
            Ok(true) => {},
            Ok(false) => {
                let message = "Another sync invocation holds the lease".to_string();
                warn!("{}", message);
                self.emit_terminal(SyncEvent::error(message.clone())).await;
                anyhow::bail!(message);
            },
            Err(e) => {
                let message = format!("Failed to acquire sync lease: {:#}", e);
                error!("{}", message);
                self.emit_terminal(SyncEvent::error(message)).await;
                return Err(e.context("Failed to acquire sync lease"));
            },
        }

        let result = self.run_batch(&cancel).await;

        if let Err(e) = self.store.release_lease(CHECKPOINT_KIND, &holder).await {
            warn!("Failed to release sync lease: {:#}", e);
        }

        result
    }

    async fn run_batch(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.emit(SyncEvent::progress("Starting avatar ownership sync"));

        let total_supply = match self.ledger.total_supply().await {
            Ok(supply) => supply,
            Err(e) => {
                // Fatal: no progress was made, so no checkpoint is written.
                let message = format!("Failed to read total supply: {:#}", e);
                error!("{}", message);
                self.emit_terminal(SyncEvent::error(message)).await;
                return Err(e.context("Failed to read total supply"));
            },
        };

        self.emit(SyncEvent::progress_with(
            format!("Total supply: {}", total_supply),
            ProgressData {
                total_supply: Some(total_supply),
                ..Default::default()
            },
        ));

        if total_supply == 0 {
            self.complete("Fully synchronized", SyncSummary::default())
                .await;
            return Ok(());
        }

        let batch_size = match self.options.batch_size {
            0 => DEFAULT_BATCH_SIZE,
            n => n.clamp(1, MAX_BATCH_SIZE),
        };

        let start = if self.options.start_token_id > 0 {
            self.options.start_token_id
        } else {
            match self.store.load_checkpoint(CHECKPOINT_KIND).await {
                Ok(Some(checkpoint)) => {
                    self.emit(SyncEvent::progress(format!(
                        "Resuming from checkpoint at token {}",
                        checkpoint.last_processed_id
                    )));
                    checkpoint.last_processed_id + 1
                },
                Ok(None) => 1,
                Err(e) => {
                    // Fail open: a broken checkpoint read restarts the scan,
                    // it never kills the invocation.
                    warn!(
                        "Failed to load sync checkpoint, starting from the beginning: {:#}",
                        e
                    );
                    1
                },
            }
        };

        if start > total_supply {
            info!("Avatar sync already caught up at token {}", total_supply);
            self.complete(
                "Fully synchronized",
                SyncSummary {
                    total_supply,
                    processed: total_supply,
                    ..Default::default()
                },
            )
            .await;
            return Ok(());
        }

        let end_token = (start + batch_size).min(total_supply + 1);
        info!(
            "Syncing avatars {}..{} of {}",
            start,
            end_token - 1,
            total_supply
        );

        let mut counters = Counters::default();
        let mut last_processed: Option<u64> = None;

        for token_id in start..end_token {
            if cancel.is_cancelled() {
                info!("Avatar sync cancelled at token {}", token_id);
                break;
            }

            match reconcile_token(&self.ledger, &self.store, token_id).await {
                ReconcileOutcome::Updated => counters.updated += 1,
                ReconcileOutcome::NotMinted => counters.not_minted += 1,
                ReconcileOutcome::ResolutionFailed(message) => {
                    debug!("Skipping token {}: {}", token_id, message);
                    counters.skipped += 1;
                },
                ReconcileOutcome::Failed(message) => counters.record_error(message),
            }
            counters.processed += 1;
            last_processed = Some(token_id);

            if counters.processed % PROGRESS_EVERY == 0 || token_id == end_token - 1 {
                self.emit(SyncEvent::progress_with(
                    format!("Processed token {}", token_id),
                    progress_data(&counters, token_id, total_supply),
                ));
            }

            if token_id % CHECKPOINT_EVERY == 0 {
                self.checkpoint(token_id).await;
            }
        }

        // Final checkpoint regardless of the modulo cadence.
        if let Some(last) = last_processed {
            self.checkpoint(last).await;
        }

        let resume_at = last_processed.map(|last| last + 1).unwrap_or(start);
        let has_more = resume_at <= total_supply;

        if has_more && self.options.batch_delay_ms > 0 && !cancel.is_cancelled() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.options.batch_delay_ms)) => {},
                _ = cancel.cancelled() => {},
            }
        }

        if counters.error_count() > 0 {
            warn!(
                "Avatar sync batch finished with {} errors",
                counters.error_count()
            );
        }

        let message = if has_more {
            format!("Batch complete, resume at token {}", resume_at)
        } else {
            "Fully synchronized".to_string()
        };
        self.complete(message, counters.into_summary(total_supply))
            .await;

        Ok(())
    }

    async fn checkpoint(&self, token_id: u64) {
        // A lost checkpoint write only costs idempotent rework, never the batch.
        if let Err(e) = self.store.save_checkpoint(CHECKPOINT_KIND, token_id).await {
            warn!("Failed to save checkpoint at token {}: {:#}", token_id, e);
        }
    }

    /// Informational events are best-effort: a lagging consumer drops
    /// progress, it never blocks the sync.
    fn emit(&self, event: SyncEvent) {
        let _ = self.events.try_send(event);
    }

    async fn emit_terminal(&self, event: SyncEvent) {
        let _ = self.events.send(event).await;
    }

    async fn complete(&self, message: impl Into<String>, data: SyncSummary) {
        self.emit_terminal(SyncEvent::Complete {
            message: message.into(),
            data,
        })
        .await;
    }
}

fn progress_data(counters: &Counters, current_id: u64, total_supply: u64) -> ProgressData {
    let percentage = current_id as f64 / total_supply as f64 * 100.0;
    ProgressData {
        total_supply: Some(total_supply),
        processed: Some(counters.processed),
        updated: Some(counters.updated),
        skipped: Some(counters.skipped),
        not_minted: Some(counters.not_minted),
        percentage: Some((percentage * 10.0).round() / 10.0),
        current_id: Some(current_id),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::db::models::{AvatarRecord, SyncCheckpoint};
    use crate::ledger::AvatarMetadata;

    #[derive(Default, Clone)]
    struct FakeLedger {
        supply: u64,
        unminted: HashSet<u64>,
        fid_failures: HashSet<u64>,
        owner_failures: HashSet<u64>,
    }

    impl FakeLedger {
        fn new(supply: u64) -> Self {
            Self {
                supply,
                ..Default::default()
            }
        }
    }

    impl crate::ledger::Ledger for FakeLedger {
        async fn total_supply(&self) -> anyhow::Result<u64> {
            Ok(self.supply)
        }

        async fn fid_of(&self, token_id: u64) -> anyhow::Result<u64> {
            if self.fid_failures.contains(&token_id) {
                anyhow::bail!("execution reverted");
            }
            if self.unminted.contains(&token_id) {
                return Ok(0);
            }
            Ok(token_id + 1000)
        }

        async fn owner_of(&self, token_id: u64) -> anyhow::Result<String> {
            if self.owner_failures.contains(&token_id) {
                anyhow::bail!("owner lookup failed");
            }
            Ok(format!("0x{:040x}", token_id))
        }

        async fn avatar_of(&self, token_id: u64) -> anyhow::Result<AvatarMetadata> {
            Ok(AvatarMetadata {
                image_url: format!("ipfs://avatars/{}", token_id),
                style: "pixel".to_string(),
                minted_at: 1_700_000_000 + token_id,
            })
        }
    }

    #[derive(Default, Clone)]
    struct FakeStore {
        checkpoint: Arc<Mutex<Option<u64>>>,
        checkpoint_writes: Arc<Mutex<Vec<u64>>>,
        avatars: Arc<Mutex<Vec<AvatarRecord>>>,
        lease_taken: bool,
    }

    impl crate::db::SyncStore for FakeStore {
        async fn load_checkpoint(&self, kind: &str) -> anyhow::Result<Option<SyncCheckpoint>> {
            Ok(self
                .checkpoint
                .lock()
                .unwrap()
                .map(|id| SyncCheckpoint::new(kind, id)))
        }

        async fn save_checkpoint(&self, _kind: &str, last_processed_id: u64) -> anyhow::Result<()> {
            *self.checkpoint.lock().unwrap() = Some(last_processed_id);
            self.checkpoint_writes.lock().unwrap().push(last_processed_id);
            Ok(())
        }

        async fn try_acquire_lease(
            &self,
            _kind: &str,
            _holder: &str,
            _ttl: Duration,
        ) -> anyhow::Result<bool> {
            Ok(!self.lease_taken)
        }

        async fn release_lease(&self, _kind: &str, _holder: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn find_avatar_by_fid(&self, fid: u64) -> anyhow::Result<Option<AvatarRecord>> {
            Ok(self
                .avatars
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.fid == fid)
                .max_by_key(|r| r.updated_at)
                .cloned())
        }

        async fn insert_avatar(&self, record: &AvatarRecord) -> anyhow::Result<()> {
            self.avatars.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn update_avatar(&self, record: &AvatarRecord) -> anyhow::Result<()> {
            let mut avatars = self.avatars.lock().unwrap();
            for row in avatars.iter_mut().filter(|r| r.fid == record.fid) {
                *row = record.clone();
            }
            Ok(())
        }
    }

    fn options(batch_size: u64, start_token_id: u64) -> SyncOptions {
        SyncOptions {
            batch_size,
            start_token_id,
            batch_delay_ms: 0,
            ..Default::default()
        }
    }

    async fn run_driver(
        ledger: FakeLedger,
        store: FakeStore,
        options: SyncOptions,
    ) -> (Vec<SyncEvent>, anyhow::Result<()>) {
        let (tx, mut rx) = mpsc::channel(256);
        let driver = SyncDriver::new(ledger, store, tx, options);
        let result = driver.run(CancellationToken::new()).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (events, result)
    }

    fn summary(events: &[SyncEvent]) -> SyncSummary {
        match events.last().expect("no events emitted") {
            SyncEvent::Complete { data, .. } => data.clone(),
            other => panic!("expected terminal complete event, got {:?}", other),
        }
    }

    fn terminal_message(events: &[SyncEvent]) -> String {
        match events.last().expect("no events emitted") {
            SyncEvent::Complete { message, .. } | SyncEvent::Error { message } => message.clone(),
            other => panic!("expected terminal event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn small_supply_synchronizes_fully() {
        let store = FakeStore::default();
        let (events, result) = run_driver(FakeLedger::new(20), store.clone(), options(0, 0)).await;

        assert!(result.is_ok());
        let data = summary(&events);
        assert_eq!(data.total_supply, 20);
        assert_eq!(data.processed, 20);
        assert_eq!(data.updated, 20);
        assert!(data.errors.is_empty());
        assert_eq!(terminal_message(&events), "Fully synchronized");
        assert_eq!(store.avatars.lock().unwrap().len(), 20);

        // Lifecycle ordering: start, then total-supply-known.
        assert!(matches!(&events[0], SyncEvent::Progress { message, .. }
            if message == "Starting avatar ownership sync"));
        assert!(matches!(&events[1], SyncEvent::Progress { message, .. }
            if message == "Total supply: 20"));
    }

    #[tokio::test]
    async fn batch_size_zero_defaults_to_one_hundred() {
        let (events, _) = run_driver(
            FakeLedger::new(250),
            FakeStore::default(),
            options(0, 0),
        )
        .await;

        let data = summary(&events);
        assert_eq!(data.processed, 100);
        assert_eq!(terminal_message(&events), "Batch complete, resume at token 101");
    }

    #[tokio::test]
    async fn oversized_batch_clamps_to_five_hundred() {
        let (events, _) = run_driver(
            FakeLedger::new(2000),
            FakeStore::default(),
            options(10_000, 0),
        )
        .await;

        let data = summary(&events);
        assert_eq!(data.processed, 500);
        assert_eq!(terminal_message(&events), "Batch complete, resume at token 501");
    }

    #[tokio::test]
    async fn auto_resume_starts_after_checkpoint() {
        let store = FakeStore::default();
        *store.checkpoint.lock().unwrap() = Some(40);

        let (events, _) = run_driver(FakeLedger::new(60), store.clone(), options(10, 0)).await;

        assert!(events.iter().any(|e| matches!(e, SyncEvent::Progress { message, .. }
            if message == "Resuming from checkpoint at token 40")));

        let first_token = store
            .avatars
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.token_id)
            .min()
            .unwrap();
        assert_eq!(first_token, 41);
        assert_eq!(terminal_message(&events), "Batch complete, resume at token 51");
    }

    #[tokio::test]
    async fn start_past_supply_completes_without_iteration() {
        let store = FakeStore::default();
        let (events, result) = run_driver(FakeLedger::new(50), store.clone(), options(0, 51)).await;

        assert!(result.is_ok());
        let data = summary(&events);
        assert_eq!(data.processed, 50);
        assert_eq!(data.updated, 0);
        assert_eq!(terminal_message(&events), "Fully synchronized");
        assert!(store.avatars.lock().unwrap().is_empty());
        assert!(store.checkpoint_writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_supply_completes_immediately() {
        let store = FakeStore::default();
        let (events, result) = run_driver(FakeLedger::new(0), store.clone(), options(0, 0)).await;

        assert!(result.is_ok());
        let data = summary(&events);
        assert_eq!(data.total_supply, 0);
        assert_eq!(data.processed, 0);
        assert!(store.checkpoint_writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unminted_slots_count_as_not_minted() {
        let mut ledger = FakeLedger::new(10);
        ledger.unminted = [3, 7].into_iter().collect();

        let (events, _) = run_driver(ledger, FakeStore::default(), options(0, 0)).await;

        let data = summary(&events);
        assert_eq!(data.not_minted, 2);
        assert_eq!(data.updated, 8);
        assert!(data.errors.is_empty());
    }

    #[tokio::test]
    async fn fid_resolution_failure_is_skipped_not_an_error() {
        let mut ledger = FakeLedger::new(10);
        ledger.fid_failures = [4].into_iter().collect();

        let (events, _) = run_driver(ledger, FakeStore::default(), options(0, 0)).await;

        let data = summary(&events);
        assert_eq!(data.skipped, 1);
        assert_eq!(data.updated, 9);
        assert!(data.errors.is_empty());
    }

    #[tokio::test]
    async fn per_token_failure_does_not_stop_the_batch() {
        let mut ledger = FakeLedger::new(10);
        ledger.owner_failures = [5].into_iter().collect();

        let (events, result) = run_driver(ledger, FakeStore::default(), options(0, 0)).await;

        assert!(result.is_ok());
        let data = summary(&events);
        assert_eq!(data.processed, 10);
        assert_eq!(data.updated, 9);
        assert_eq!(data.errors.len(), 1);
        // Error names the logical id of token 5.
        assert!(data.errors[0].contains("fid 1005"));
    }

    #[tokio::test]
    async fn checkpoints_are_monotonic_and_cover_batch_end() {
        let store = FakeStore::default();
        let (_, result) = run_driver(FakeLedger::new(37), store.clone(), options(0, 0)).await;
        assert!(result.is_ok());

        let writes = store.checkpoint_writes.lock().unwrap().clone();
        assert_eq!(writes, vec![10, 20, 30, 37]);
        assert!(writes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn rerun_over_synced_range_creates_no_duplicates() {
        let store = FakeStore::default();
        run_driver(FakeLedger::new(15), store.clone(), options(0, 0)).await;
        assert_eq!(store.avatars.lock().unwrap().len(), 15);

        // Re-run the same range explicitly from the start.
        let (events, _) = run_driver(FakeLedger::new(15), store.clone(), options(0, 1)).await;

        let data = summary(&events);
        assert_eq!(data.updated, 15);
        assert_eq!(store.avatars.lock().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn progress_events_fire_every_fifth_token_and_at_batch_end() {
        let (events, _) = run_driver(FakeLedger::new(12), FakeStore::default(), options(0, 0)).await;

        let current_ids: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Progress { data: Some(data), .. } => data.current_id,
                _ => None,
            })
            .collect();
        assert_eq!(current_ids, vec![5, 10, 12]);
    }

    #[tokio::test]
    async fn held_lease_aborts_with_terminal_error() {
        let store = FakeStore {
            lease_taken: true,
            ..Default::default()
        };
        let (events, result) = run_driver(FakeLedger::new(10), store.clone(), options(0, 0)).await;

        assert!(result.is_err());
        assert!(matches!(events.last(), Some(SyncEvent::Error { message })
            if message.contains("lease")));
        assert!(store.avatars.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_list_is_bounded() {
        let mut ledger = FakeLedger::new(40);
        ledger.owner_failures = (1..=40).collect();

        let (events, _) = run_driver(ledger, FakeStore::default(), options(0, 0)).await;

        let data = summary(&events);
        assert_eq!(data.processed, 40);
        assert_eq!(data.errors.len(), MAX_RECORDED_ERRORS + 1);
        assert_eq!(data.errors.last().unwrap(), "15 more errors omitted");
    }

    #[tokio::test]
    async fn cancelled_invocation_still_emits_a_terminal_event() {
        let (tx, mut rx) = mpsc::channel(256);
        let driver = SyncDriver::new(
            FakeLedger::new(30),
            FakeStore::default(),
            tx,
            options(0, 0),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = driver.run(cancel).await;
        assert!(result.is_ok());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let data = summary(&events);
        assert_eq!(data.processed, 0);
        assert_eq!(terminal_message(&events), "Batch complete, resume at token 1");
    }
}
