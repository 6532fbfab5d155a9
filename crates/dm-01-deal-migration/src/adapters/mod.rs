//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implementations of the outbound ports.
//!
//! - `LazySectorMount`: the mount registered for every migrated piece
//! - In-memory piece store, sector accessor and shard index
//! - Registration stores, in memory or over a key-value store

mod kv;
mod lazy_mount;
mod piece_store;
mod registration_store;
mod sector_accessor;
mod shard_index;

pub use kv::{FileBackedKVStore, InMemoryKVStore};
pub use lazy_mount::LazySectorMount;
pub use piece_store::{InMemoryPieceStore, PieceDealInfo};
pub use registration_store::{
    InMemoryRegistrationStore, KvRegistrationStore, RegistrationRecord, REGISTERED_PREFIX,
};
pub use sector_accessor::InMemorySectorAccessor;
pub use shard_index::InMemoryShardIndex;
