//! # Inbound Ports
//!
//! API trait defining what the Deal Migration subsystem can do.

use async_trait::async_trait;
use shared_types::{DealRecord, PieceCid};
use tokio::sync::watch;

use crate::domain::{MigrationError, MigrationReport};

/// Cancellation signal observed by a migration run. `true` means cancel.
pub type CancelSignal = watch::Receiver<bool>;

/// Signal that never fires.
pub fn never_cancelled() -> CancelSignal {
    let (_tx, rx) = watch::channel(false);
    rx
}

/// Wait until `signal` fires. Never returns if the sender is dropped first.
pub async fn cancelled(signal: &mut CancelSignal) {
    if signal.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Deal migration API - inbound port.
#[async_trait]
pub trait DealMigrationApi: Send + Sync {
    /// Register a shard for every eligible, not-yet-registered deal piece.
    ///
    /// Returns `true` iff at least one shard was newly registered by this
    /// call. Per-deal failures are skipped and logged.
    async fn migrate_deals(
        &self,
        deals: &[DealRecord],
        cancel: &CancelSignal,
    ) -> Result<bool, MigrationError>;

    /// Same as `migrate_deals`, with the full per-deal account.
    async fn migrate_deals_with_report(
        &self,
        deals: &[DealRecord],
        cancel: &CancelSignal,
    ) -> Result<MigrationReport, MigrationError>;

    /// Submit every errored shard this coordinator registered for recovery.
    ///
    /// Returns the number of shards submitted.
    async fn recover_errored_shards(&self) -> Result<usize, MigrationError>;

    /// Pieces with a registered shard, sorted.
    fn registered_pieces(&self) -> Result<Vec<PieceCid>, MigrationError>;
}
