//! Test utilities for deal migration.
//!
//! Deterministic piece CIDs, deal builders and a harness wiring the
//! in-memory adapters to a `DealMigrationService`.
//!
//! # Example
//!
//! ```rust
//! use dm_01_deal_migration::test_utils::{deal, generate_piece_cids, TestHarness};
//! use shared_types::DealState;
//!
//! let harness = TestHarness::new();
//! let pieces = generate_piece_cids(1);
//! harness.add_piece(&pieces[0], 1, 10, true, 64);
//! let deals = vec![deal(1, &pieces[0], DealState::Active, 10)];
//! assert_eq!(deals.len(), 1);
//! ```

use std::sync::Arc;

use sha2::{Digest, Sha256};
use shared_types::{DealId, DealRecord, DealState, PieceCid, SectorNumber};

use crate::adapters::{
    InMemoryPieceStore, InMemoryRegistrationStore, InMemorySectorAccessor, InMemoryShardIndex,
    PieceDealInfo,
};
use crate::domain::{MigrationConfig, RegistrationState};
use crate::service::DealMigrationService;

/// Service wired to the in-memory adapters.
pub type TestService =
    DealMigrationService<InMemoryPieceStore, InMemorySectorAccessor, InMemoryShardIndex>;

/// Generate `count` distinct, deterministic piece CIDs.
pub fn generate_piece_cids(count: usize) -> Vec<PieceCid> {
    (0..count as u64)
        .filter_map(|i| {
            let digest = Sha256::digest(i.to_le_bytes());
            PieceCid::new(format!("baga6ea4sea{}", hex::encode(&digest[..16]))).ok()
        })
        .collect()
}

/// Build a deal record.
pub fn deal(
    deal_id: DealId,
    piece: &PieceCid,
    state: DealState,
    sector: SectorNumber,
) -> DealRecord {
    DealRecord::new(deal_id, piece.clone(), state, sector)
}

/// Deterministic contents for a piece.
pub fn piece_bytes(piece: &PieceCid, length: u64) -> Vec<u8> {
    let seed = Sha256::digest(piece.as_str().as_bytes());
    seed.iter().copied().cycle().take(length as usize).collect()
}

/// In-memory adapters plus a service over them.
pub struct TestHarness {
    /// Piece store answering location lookups.
    pub piece_store: Arc<InMemoryPieceStore>,
    /// Sector accessor answering probes and unseals.
    pub sectors: Arc<InMemorySectorAccessor>,
    /// Shard index receiving registrations.
    pub index: Arc<InMemoryShardIndex>,
    /// Service under test.
    pub service: Arc<TestService>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness with `MigrationConfig::for_testing()`.
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::for_testing())
    }

    /// Harness with a custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if `config` does not validate.
    pub fn with_config(config: MigrationConfig) -> Self {
        Self::with_parts(
            InMemorySectorAccessor::new(),
            RegistrationState::new(Arc::new(InMemoryRegistrationStore::new())),
            config,
        )
    }

    /// Harness over a prepared accessor and registration state.
    ///
    /// # Panics
    ///
    /// Panics if `config` does not validate.
    pub fn with_parts(
        sectors: InMemorySectorAccessor,
        registrations: RegistrationState,
        config: MigrationConfig,
    ) -> Self {
        Self::with_components(
            Arc::new(InMemoryPieceStore::new()),
            Arc::new(sectors),
            Arc::new(InMemoryShardIndex::new()),
            registrations,
            config,
        )
    }

    /// Harness over existing adapters, e.g. a coordinator restarted against
    /// the same shard index.
    ///
    /// # Panics
    ///
    /// Panics if `config` does not validate.
    pub fn with_components(
        piece_store: Arc<InMemoryPieceStore>,
        sectors: Arc<InMemorySectorAccessor>,
        index: Arc<InMemoryShardIndex>,
        registrations: RegistrationState,
        config: MigrationConfig,
    ) -> Self {
        let service = DealMigrationService::new(
            Arc::clone(&piece_store),
            Arc::clone(&sectors),
            Arc::clone(&index),
            registrations,
            config,
        )
        .expect("invalid test configuration");

        Self {
            piece_store,
            sectors,
            index,
            service: Arc::new(service),
        }
    }

    /// Store a piece alone in `sector` and record the deal that placed it.
    pub fn add_piece(
        &self,
        piece: &PieceCid,
        deal_id: DealId,
        sector: SectorNumber,
        unsealed: bool,
        length: u64,
    ) {
        self.sectors.add_sector(sector, piece_bytes(piece, length), unsealed);
        self.piece_store.add_deal_for_piece(
            piece.clone(),
            PieceDealInfo {
                deal_id,
                sector,
                offset: 0,
                length,
            },
        );
    }
}
