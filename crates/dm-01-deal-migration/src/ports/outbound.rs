//! # Outbound Ports
//!
//! Traits for the collaborators the migration coordinator drives: the piece
//! store, the sector accessor, the shard index and the registration store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{PieceCid, PieceLocation, SectorNumber, ShardKey};
use tokio::sync::oneshot;

use crate::domain::{
    KVStoreError, LocatorError, MountError, MountReader, MountStat, RegisterOptions,
    RegistrationStoreError, SectorAccessError, SectorStream, ShardIndexError, ShardInfo,
    ShardState,
};

/// Piece locator - outbound port.
///
/// Resolves where a piece lives inside a sector. Queries only, no side effects.
#[async_trait]
pub trait PieceLocator: Send + Sync {
    /// Locate `piece` inside `sector`.
    async fn locate(
        &self,
        piece: &PieceCid,
        sector: SectorNumber,
    ) -> Result<PieceLocation, LocatorError>;
}

/// Sector data accessor - outbound port.
#[async_trait]
pub trait SectorAccessor: Send + Sync {
    /// Whether an unsealed copy covering the range exists. Never unseals.
    async fn is_unsealed(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
    ) -> Result<bool, SectorAccessError>;

    /// Produce a stream over the range, unsealing if needed.
    async fn unseal_range(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn SectorStream>, SectorAccessError>;
}

/// Mount handed to the shard index with a registration.
///
/// Holds only the location and an accessor handle until `fetch` is called.
#[async_trait]
pub trait Mount: Send + Sync + fmt::Debug {
    /// Open a reader over the piece, unsealing if needed.
    async fn fetch(&self) -> Result<MountReader, MountError>;

    /// Metadata without unsealing.
    async fn stat(&self) -> Result<MountStat, MountError>;

    /// Where the piece lives.
    fn location(&self) -> PieceLocation;
}

/// Pending shard registration.
///
/// Resolves once the index has finished with the shard: immediately for lazy
/// registrations, after initialization for eager ones. Dropping the job does
/// not cancel the registration.
#[derive(Debug)]
pub struct RegistrationJob {
    key: ShardKey,
    completion: oneshot::Receiver<Result<ShardState, ShardIndexError>>,
}

impl RegistrationJob {
    /// Job whose completion is signalled through `completion`.
    pub fn new(
        key: ShardKey,
        completion: oneshot::Receiver<Result<ShardState, ShardIndexError>>,
    ) -> Self {
        Self { key, completion }
    }

    /// Job that is already complete.
    pub fn resolved(key: ShardKey, result: Result<ShardState, ShardIndexError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(key, rx)
    }

    /// Shard this job belongs to.
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    /// Wait for the index to finish with the shard.
    pub async fn completion(self) -> Result<ShardState, ShardIndexError> {
        self.completion.await.unwrap_or(Err(ShardIndexError::Closed))
    }
}

/// Shard index - outbound port.
#[async_trait]
pub trait ShardIndex: Send + Sync {
    /// Register a shard. `Ok` means the index accepted the registration.
    async fn register_shard(
        &self,
        key: ShardKey,
        mount: Arc<dyn Mount>,
        opts: RegisterOptions,
    ) -> Result<RegistrationJob, ShardIndexError>;

    /// Every shard the index knows, sorted by key.
    async fn list_shards(&self) -> Result<Vec<ShardInfo>, ShardIndexError>;

    /// Information about one shard.
    async fn shard_info(&self, key: &ShardKey) -> Result<Option<ShardInfo>, ShardIndexError>;

    /// Move an errored shard back through initialization.
    async fn recover_shard(&self, key: &ShardKey) -> Result<RegistrationJob, ShardIndexError>;
}

/// Durable set of registered piece CIDs - outbound port.
///
/// Append-only: entries are never removed.
pub trait RegistrationStore: Send + Sync {
    /// Whether `piece` has been recorded.
    fn contains(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError>;

    /// Record `piece`. Returns `false` if it was already present.
    fn insert(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError>;

    /// All recorded pieces, sorted.
    fn list(&self) -> Result<Vec<PieceCid>, RegistrationStoreError>;
}

/// Result of a prefix scan.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Key-value store - outbound port for registration persistence.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// Iterate over keys with a prefix.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ShardKey {
        ShardKey::from(PieceCid::new("bagajob").unwrap())
    }

    #[tokio::test]
    async fn test_resolved_job() {
        let job = RegistrationJob::resolved(key(), Ok(ShardState::New));
        assert_eq!(job.key(), &key());
        assert_eq!(job.completion().await, Ok(ShardState::New));
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_closed() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let job = RegistrationJob::new(key(), rx);
        assert_eq!(job.completion().await, Err(ShardIndexError::Closed));
    }
}
