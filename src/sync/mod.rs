mod driver;
mod events;
mod reconciler;

pub use driver::{SyncDriver, SyncOptions, CHECKPOINT_KIND};
pub use events::{ProgressData, SyncEvent, SyncSummary};
pub use reconciler::{reconcile_token, ReconcileOutcome};
