//! In-memory piece store implementing the `PieceLocator` port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{DealId, PieceCid, PieceLocation, SectorNumber};
use tracing::debug;

use crate::domain::LocatorError;
use crate::ports::outbound::PieceLocator;

/// Where one deal placed a piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PieceDealInfo {
    /// Deal that stored the piece.
    pub deal_id: DealId,
    /// Sector holding it.
    pub sector: SectorNumber,
    /// Byte offset in the sector.
    pub offset: u64,
    /// Piece length in bytes.
    pub length: u64,
}

/// Piece store kept in memory.
#[derive(Default)]
pub struct InMemoryPieceStore {
    pieces: RwLock<HashMap<PieceCid, Vec<PieceDealInfo>>>,
    unavailable: AtomicBool,
    transient_failures: AtomicU32,
    lookups: AtomicUsize,
}

impl InMemoryPieceStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `deal` placed `piece` in a sector.
    pub fn add_deal_for_piece(&self, piece: PieceCid, deal: PieceDealInfo) {
        self.pieces.write().entry(piece).or_default().push(deal);
    }

    /// Fail every lookup while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` lookups.
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PieceLocator for InMemoryPieceStore {
    async fn locate(
        &self,
        piece: &PieceCid,
        sector: SectorNumber,
    ) -> Result<PieceLocation, LocatorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        debug!("[dm-01] Locating piece {} in sector {}", piece, sector);

        if self.unavailable.load(Ordering::SeqCst) || self.take_transient_failure() {
            return Err(LocatorError::Unavailable("piece store offline".into()));
        }

        let pieces = self.pieces.read();
        let deals = pieces
            .get(piece)
            .ok_or_else(|| LocatorError::PieceNotFound(piece.clone()))?;

        deals
            .iter()
            .find(|d| d.sector == sector)
            .map(|d| PieceLocation::new(d.sector, d.offset, d.length))
            .ok_or(LocatorError::NotInSector {
                piece: piece.clone(),
                sector,
            })
    }
}
