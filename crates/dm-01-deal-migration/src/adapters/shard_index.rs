//! # In-Memory Shard Index
//!
//! Shard index implementing the `ShardIndex` port.
//!
//! Registration inserts the shard in `New`. Eager registrations are queued
//! for a background initializer which fetches the mount, reads it fully and
//! moves the shard to `Available` (or `Errored`). Lazy registrations are only
//! initialized on first `acquire_shard`.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::ShardKey;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{
    MountError, MountReader, RegisterOptions, SectorAccessError, ShardIndexError, ShardInfo,
    ShardState,
};
use crate::ports::inbound::cancelled;
use crate::ports::outbound::{Mount, RegistrationJob, ShardIndex};

type Completion = oneshot::Sender<Result<ShardState, ShardIndexError>>;

struct ShardEntry {
    mount: Arc<dyn Mount>,
    state: ShardState,
    lazy: bool,
    error: Option<String>,
    indexed_bytes: u64,
    readers: usize,
}

impl ShardEntry {
    fn info(&self, key: &ShardKey) -> ShardInfo {
        ShardInfo {
            key: key.clone(),
            state: self.state,
            lazy: self.lazy,
            error: self.error.clone(),
        }
    }
}

struct InitRequest {
    key: ShardKey,
    done: Completion,
}

/// Shard index kept in memory.
pub struct InMemoryShardIndex {
    shards: RwLock<HashMap<ShardKey, ShardEntry>>,
    queue: mpsc::UnboundedSender<InitRequest>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<InitRequest>>>,
    available: AtomicBool,
    rejected: RwLock<HashSet<ShardKey>>,
    register_calls: AtomicUsize,
}

impl Default for InMemoryShardIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryShardIndex {
    /// Empty index. Eager shards stay `New` until `spawn_initializer` runs.
    pub fn new() -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        Self {
            shards: RwLock::new(HashMap::new()),
            queue,
            pending: Mutex::new(Some(pending)),
            available: AtomicBool::new(true),
            rejected: RwLock::new(HashSet::new()),
            register_calls: AtomicUsize::new(0),
        }
    }

    /// Start the background initializer.
    ///
    /// Returns `None` if it was already started. The task stops when
    /// `shutdown` fires or the index is dropped.
    pub fn spawn_initializer(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let mut requests = self.pending.lock().take()?;
        let index: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            info!("[dm-01] Shard initializer started");
            loop {
                let request = tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => break,
                    request = requests.recv() => request,
                };
                let Some(InitRequest { key, done }) = request else {
                    break;
                };
                let Some(strong) = index.upgrade() else {
                    break;
                };
                let result = strong.initialize(&key).await;
                let _ = done.send(result);
            }
            info!("[dm-01] Shard initializer stopped");
        }))
    }

    /// Initialize a shard now: fetch its mount and read it fully.
    pub async fn initialize(&self, key: &ShardKey) -> Result<ShardState, ShardIndexError> {
        let mount = {
            let mut shards = self.shards.write();
            let entry = shards
                .get_mut(key)
                .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
            match entry.state {
                ShardState::New => entry.state = ShardState::Initializing,
                ShardState::Recovering => {}
                state if state.is_ready() => return Ok(state),
                from => {
                    return Err(ShardIndexError::InvalidTransition {
                        key: key.clone(),
                        from,
                        to: ShardState::Initializing,
                    })
                }
            }
            Arc::clone(&entry.mount)
        };

        debug!("[dm-01] Initializing shard {}", key);
        let outcome = read_fully(mount.as_ref()).await;

        let mut shards = self.shards.write();
        let entry = shards
            .get_mut(key)
            .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
        match outcome {
            Ok(bytes) => {
                entry.state = ShardState::Available;
                entry.indexed_bytes = bytes;
                entry.error = None;
                info!("[dm-01] Shard {} available ({} bytes)", key, bytes);
                Ok(ShardState::Available)
            }
            Err(e) => {
                entry.state = ShardState::Errored;
                entry.error = Some(e.to_string());
                warn!("[dm-01] Shard {} errored: {}", key, e);
                Err(ShardIndexError::MountFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Open a reader over a shard, initializing it first if it is `New`.
    pub async fn acquire_shard(&self, key: &ShardKey) -> Result<MountReader, ShardIndexError> {
        let state = self
            .state_of(key)
            .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
        if state == ShardState::New {
            self.initialize(key).await?;
        }

        let mount = {
            let shards = self.shards.read();
            let entry = shards
                .get(key)
                .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
            if !entry.state.is_ready() {
                return Err(ShardIndexError::InvalidTransition {
                    key: key.clone(),
                    from: entry.state,
                    to: ShardState::Serving,
                });
            }
            Arc::clone(&entry.mount)
        };

        let reader = mount
            .fetch()
            .await
            .map_err(|e| ShardIndexError::MountFailed {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let mut shards = self.shards.write();
        if let Some(entry) = shards.get_mut(key) {
            entry.readers += 1;
            entry.state = ShardState::Serving;
        }
        Ok(reader)
    }

    /// Give back a reader obtained from `acquire_shard`.
    pub fn release_shard(&self, key: &ShardKey) -> Result<(), ShardIndexError> {
        let mut shards = self.shards.write();
        let entry = shards
            .get_mut(key)
            .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
        entry.readers = entry.readers.saturating_sub(1);
        if entry.readers == 0 && entry.state == ShardState::Serving {
            entry.state = ShardState::Available;
        }
        Ok(())
    }

    /// Current state of a shard.
    pub fn state_of(&self, key: &ShardKey) -> Option<ShardState> {
        self.shards.read().get(key).map(|e| e.state)
    }

    /// Bytes read when the shard was last initialized.
    pub fn indexed_bytes(&self, key: &ShardKey) -> Option<u64> {
        self.shards.read().get(key).map(|e| e.indexed_bytes)
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    /// No shards registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls to `register_shard`, including refused ones.
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Refuse all work while `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Refuse registrations for `key`.
    pub fn reject(&self, key: ShardKey) {
        self.rejected.write().insert(key);
    }

    fn ensure_available(&self) -> Result<(), ShardIndexError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ShardIndexError::Unavailable("shard index offline".into()))
        }
    }

    fn enqueue(&self, key: ShardKey) -> Result<RegistrationJob, ShardIndexError> {
        let (done, completion) = oneshot::channel();
        self.queue
            .send(InitRequest {
                key: key.clone(),
                done,
            })
            .map_err(|_| ShardIndexError::Closed)?;
        Ok(RegistrationJob::new(key, completion))
    }
}

/// Read a mount end to end, failing before any unseal if its sector is gone.
async fn read_fully(mount: &dyn Mount) -> Result<u64, MountError> {
    let location = mount.location();
    let stat = mount.stat().await?;
    if !stat.exists {
        return Err(SectorAccessError::SectorNotFound(location.sector).into());
    }

    let mut reader = mount.fetch().await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    let read = buf.len() as u64;
    if read != stat.size {
        return Err(MountError::Io(format!(
            "short read from sector {}: {} of {} bytes",
            location.sector, read, stat.size
        )));
    }
    Ok(read)
}

#[async_trait]
impl ShardIndex for InMemoryShardIndex {
    async fn register_shard(
        &self,
        key: ShardKey,
        mount: Arc<dyn Mount>,
        opts: RegisterOptions,
    ) -> Result<RegistrationJob, ShardIndexError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        if self.rejected.read().contains(&key) {
            return Err(ShardIndexError::Rejected {
                key,
                reason: "refused by index".into(),
            });
        }

        {
            let mut shards = self.shards.write();
            if shards.contains_key(&key) {
                return Err(ShardIndexError::AlreadyRegistered(key));
            }
            shards.insert(
                key.clone(),
                ShardEntry {
                    mount,
                    state: ShardState::New,
                    lazy: opts.lazy,
                    error: None,
                    indexed_bytes: 0,
                    readers: 0,
                },
            );
        }
        debug!("[dm-01] Registered shard {} (lazy={})", key, opts.lazy);

        if opts.lazy {
            Ok(RegistrationJob::resolved(key, Ok(ShardState::New)))
        } else {
            self.enqueue(key)
        }
    }

    async fn list_shards(&self) -> Result<Vec<ShardInfo>, ShardIndexError> {
        self.ensure_available()?;
        let mut infos: Vec<_> = self
            .shards
            .read()
            .iter()
            .map(|(key, entry)| entry.info(key))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn shard_info(&self, key: &ShardKey) -> Result<Option<ShardInfo>, ShardIndexError> {
        self.ensure_available()?;
        Ok(self.shards.read().get(key).map(|entry| entry.info(key)))
    }

    async fn recover_shard(&self, key: &ShardKey) -> Result<RegistrationJob, ShardIndexError> {
        self.ensure_available()?;
        {
            let mut shards = self.shards.write();
            let entry = shards
                .get_mut(key)
                .ok_or_else(|| ShardIndexError::UnknownShard(key.clone()))?;
            if !entry.state.can_transition_to(ShardState::Recovering) {
                return Err(ShardIndexError::InvalidTransition {
                    key: key.clone(),
                    from: entry.state,
                    to: ShardState::Recovering,
                });
            }
            entry.state = ShardState::Recovering;
        }
        info!("[dm-01] Recovering shard {}", key);
        self.enqueue(key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemorySectorAccessor, LazySectorMount};
    use crate::ports::inbound::never_cancelled;
    use shared_types::{PieceCid, PieceLocation};
    use tokio::sync::Semaphore;

    fn key(s: &str) -> ShardKey {
        ShardKey::from(PieceCid::new(s).unwrap())
    }

    fn setup(unsealed: bool) -> (Arc<InMemorySectorAccessor>, Arc<dyn Mount>) {
        let accessor = Arc::new(InMemorySectorAccessor::new());
        accessor.add_sector(1, vec![9; 64], unsealed);
        let mount: Arc<dyn Mount> = Arc::new(LazySectorMount::new(
            Arc::clone(&accessor),
            PieceLocation::new(1, 0, 64),
            Arc::new(Semaphore::new(1)),
        ));
        (accessor, mount)
    }

    #[tokio::test]
    async fn test_register_inserts_new() {
        let index = InMemoryShardIndex::new();
        let (_, mount) = setup(true);

        index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: false })
            .await
            .unwrap();

        let info = index.shard_info(&key("baga1")).await.unwrap().unwrap();
        assert_eq!(info.state, ShardState::New);
        assert!(!info.lazy);
    }

    #[tokio::test]
    async fn test_duplicate_registration_refused() {
        let index = InMemoryShardIndex::new();
        let (_, mount) = setup(true);

        index
            .register_shard(key("baga1"), Arc::clone(&mount), RegisterOptions::default())
            .await
            .unwrap();
        let err = index
            .register_shard(key("baga1"), mount, RegisterOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, ShardIndexError::AlreadyRegistered(key("baga1")));
    }

    #[tokio::test]
    async fn test_lazy_job_resolves_immediately() {
        let index = InMemoryShardIndex::new();
        let (accessor, mount) = setup(false);

        let job = index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: true })
            .await
            .unwrap();
        assert_eq!(job.completion().await, Ok(ShardState::New));
        assert_eq!(accessor.unseal_calls(), 0);
    }

    #[tokio::test]
    async fn test_initializer_makes_eager_shard_available() {
        let index = Arc::new(InMemoryShardIndex::new());
        let _task = index.spawn_initializer(never_cancelled()).unwrap();
        assert!(index.spawn_initializer(never_cancelled()).is_none());

        let (_, mount) = setup(true);
        let job = index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: false })
            .await
            .unwrap();

        assert_eq!(job.completion().await, Ok(ShardState::Available));
        assert_eq!(index.indexed_bytes(&key("baga1")), Some(64));
    }

    #[tokio::test]
    async fn test_acquire_initializes_lazy_shard() {
        let index = InMemoryShardIndex::new();
        let (accessor, mount) = setup(false);
        index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: true })
            .await
            .unwrap();
        assert_eq!(accessor.unseal_calls(), 0);

        let mut reader = index.acquire_shard(&key("baga1")).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out.len(), 64);
        assert!(accessor.unseal_calls() >= 1);
        assert_eq!(index.state_of(&key("baga1")), Some(ShardState::Serving));

        index.release_shard(&key("baga1")).unwrap();
        assert_eq!(index.state_of(&key("baga1")), Some(ShardState::Available));
    }

    #[tokio::test]
    async fn test_failed_initialization_then_recovery() {
        let index = Arc::new(InMemoryShardIndex::new());
        let accessor = Arc::new(InMemorySectorAccessor::new());
        let mount: Arc<dyn Mount> = Arc::new(LazySectorMount::new(
            Arc::clone(&accessor),
            PieceLocation::new(5, 0, 16),
            Arc::new(Semaphore::new(1)),
        ));
        index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: true })
            .await
            .unwrap();

        assert!(matches!(
            index.initialize(&key("baga1")).await,
            Err(ShardIndexError::MountFailed { .. })
        ));
        let info = index.shard_info(&key("baga1")).await.unwrap().unwrap();
        assert_eq!(info.state, ShardState::Errored);
        assert!(info.error.is_some());
        // The missing sector is caught by the stat, before any unseal.
        assert_eq!(accessor.unseal_calls(), 0);

        accessor.add_sector(5, vec![1; 16], true);
        let _task = index.spawn_initializer(never_cancelled()).unwrap();
        let job = index.recover_shard(&key("baga1")).await.unwrap();
        assert_eq!(job.completion().await, Ok(ShardState::Available));
    }

    #[tokio::test]
    async fn test_recover_requires_errored() {
        let index = InMemoryShardIndex::new();
        let (_, mount) = setup(true);
        index
            .register_shard(key("baga1"), mount, RegisterOptions { lazy: true })
            .await
            .unwrap();
        assert!(matches!(
            index.recover_shard(&key("baga1")).await,
            Err(ShardIndexError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_and_rejected() {
        let index = InMemoryShardIndex::new();
        let (_, mount) = setup(true);

        index.reject(key("baga1"));
        assert!(matches!(
            index
                .register_shard(key("baga1"), Arc::clone(&mount), RegisterOptions::default())
                .await,
            Err(ShardIndexError::Rejected { .. })
        ));

        index.set_available(false);
        let err = index
            .register_shard(key("baga2"), mount, RegisterOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_systemic());
        assert_eq!(index.register_calls(), 2);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_list_shards_sorted() {
        let index = InMemoryShardIndex::new();
        for s in ["bagac", "bagaa", "bagab"] {
            let (_, mount) = setup(true);
            index
                .register_shard(key(s), mount, RegisterOptions { lazy: true })
                .await
                .unwrap();
        }
        let keys: Vec<_> = index
            .list_shards()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(keys, vec![key("bagaa"), key("bagab"), key("bagac")]);
    }

    #[tokio::test]
    async fn test_initializer_stops_on_shutdown() {
        let index = Arc::new(InMemoryShardIndex::new());
        let (tx, rx) = watch::channel(false);
        let task = index.spawn_initializer(rx).unwrap();
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
