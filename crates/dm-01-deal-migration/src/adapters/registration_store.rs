//! Registration store adapters.

use std::collections::BTreeSet;
use std::str::FromStr;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use shared_types::PieceCid;

use crate::domain::{KVStoreError, RegistrationStoreError};
use crate::ports::outbound::{KeyValueStore, RegistrationStore};

/// Key prefix for registered pieces.
pub const REGISTERED_PREFIX: &str = "/dagstore/registered/";

/// Non-persistent registration store.
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    pieces: RwLock<BTreeSet<PieceCid>>,
}

impl InMemoryRegistrationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn contains(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError> {
        Ok(self.pieces.read().contains(piece))
    }

    fn insert(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError> {
        Ok(self.pieces.write().insert(piece.clone()))
    }

    fn list(&self) -> Result<Vec<PieceCid>, RegistrationStoreError> {
        Ok(self.pieces.read().iter().cloned().collect())
    }
}

/// Value stored for each registered piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Piece registered.
    pub piece_cid: PieceCid,
    /// Unix seconds at commit time.
    pub registered_at: u64,
}

/// Registration store persisted through a `KeyValueStore`.
pub struct KvRegistrationStore<KV: KeyValueStore> {
    kv: Mutex<KV>,
}

impl<KV: KeyValueStore> KvRegistrationStore<KV> {
    /// Wrap a key-value store.
    pub fn new(kv: KV) -> Self {
        Self { kv: Mutex::new(kv) }
    }
}

impl<KV: KeyValueStore> RegistrationStore for KvRegistrationStore<KV> {
    fn contains(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError> {
        Ok(self.kv.lock().exists(&storage_key(piece))?)
    }

    fn insert(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError> {
        let key = storage_key(piece);
        let mut kv = self.kv.lock();
        if kv.exists(&key)? {
            return Ok(false);
        }

        let record = RegistrationRecord {
            piece_cid: piece.clone(),
            registered_at: unix_now(),
        };
        let value = bincode::serialize(&record).map_err(|e| KVStoreError::Serialization {
            message: e.to_string(),
        })?;
        kv.put(&key, &value)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<PieceCid>, RegistrationStoreError> {
        let entries = self.kv.lock().prefix_scan(REGISTERED_PREFIX.as_bytes())?;

        let mut pieces = entries
            .into_iter()
            .map(|(key, _)| {
                let raw = String::from_utf8_lossy(&key[REGISTERED_PREFIX.len()..]).into_owned();
                PieceCid::from_str(&raw).map_err(|_| RegistrationStoreError::CorruptEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        pieces.sort();
        Ok(pieces)
    }
}

fn storage_key(piece: &PieceCid) -> Vec<u8> {
    format!("{REGISTERED_PREFIX}{piece}").into_bytes()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FileBackedKVStore, InMemoryKVStore};

    fn piece(s: &str) -> PieceCid {
        PieceCid::new(s).unwrap()
    }

    #[test]
    fn test_in_memory_insert_is_idempotent() {
        let store = InMemoryRegistrationStore::new();
        assert!(store.insert(&piece("baga1")).unwrap());
        assert!(!store.insert(&piece("baga1")).unwrap());
        assert_eq!(store.list().unwrap(), vec![piece("baga1")]);
    }

    #[test]
    fn test_kv_store_records_piece() {
        let store = KvRegistrationStore::new(InMemoryKVStore::new());
        assert!(!store.contains(&piece("baga1")).unwrap());
        assert!(store.insert(&piece("baga1")).unwrap());
        assert!(store.contains(&piece("baga1")).unwrap());
        assert!(!store.insert(&piece("baga1")).unwrap());
    }

    #[test]
    fn test_kv_store_writes_bincode_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registered.bin");
        let store = KvRegistrationStore::new(FileBackedKVStore::open(&path).unwrap());
        store.insert(&piece("baga1")).unwrap();

        let kv = FileBackedKVStore::open(&path).unwrap();
        let bytes = kv.get(&storage_key(&piece("baga1"))).unwrap().unwrap();
        let record: RegistrationRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record.piece_cid, piece("baga1"));
        assert!(record.registered_at > 0);
    }

    #[test]
    fn test_kv_store_list_sorted() {
        let store = KvRegistrationStore::new(InMemoryKVStore::new());
        for s in ["bagaz", "bagam", "bagaa"] {
            store.insert(&piece(s)).unwrap();
        }
        assert_eq!(
            store.list().unwrap(),
            vec![piece("bagaa"), piece("bagam"), piece("bagaz")]
        );
    }

    #[test]
    fn test_kv_store_corrupt_key() {
        let mut kv = InMemoryKVStore::new();
        kv.put(format!("{REGISTERED_PREFIX}not-a-cid!").as_bytes(), b"")
            .unwrap();
        let store = KvRegistrationStore::new(kv);
        assert!(matches!(
            store.list(),
            Err(RegistrationStoreError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_kv_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.bin");

        let store = KvRegistrationStore::new(FileBackedKVStore::open(&path).unwrap());
        store.insert(&piece("baga1")).unwrap();
        drop(store);

        let reopened = KvRegistrationStore::new(FileBackedKVStore::open(&path).unwrap());
        assert!(reopened.contains(&piece("baga1")).unwrap());
    }
}
