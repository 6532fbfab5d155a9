//! # Migration Report
//!
//! Per-run account of what happened to every deal record.

use shared_types::{DealId, DealState, PieceCid};

use super::classification::Eligibility;
use super::errors::{DealFailure, DealFailureKind};

/// Shard newly registered by this run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredShard {
    /// Piece registered.
    pub piece_cid: PieceCid,
    /// First deal that referenced it.
    pub deal_id: DealId,
    /// Registered with deferred initialization.
    pub lazy: bool,
}

/// Deal skipped before any I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IneligibleDeal {
    /// Deal skipped.
    pub deal_id: DealId,
    /// Its state at migration time.
    pub state: DealState,
    /// Why it was skipped.
    pub reason: Eligibility,
}

/// What happened to one eligible piece.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DealDisposition {
    /// Newly registered with the index.
    Registered {
        /// Deferred initialization.
        lazy: bool,
    },
    /// The index already had the shard; bookkeeping caught up.
    Reconciled,
    /// Recorded by an earlier run.
    AlreadyRegistered,
    /// Another migration was registering it concurrently.
    InFlight,
    /// Skipped after an error; eligible again next run.
    Failed(DealFailureKind),
}

/// Outcome of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Shards this run registered, sorted by piece.
    pub newly_registered: Vec<RegisteredShard>,
    /// Pieces the index already held but the registration state did not.
    pub reconciled: Vec<PieceCid>,
    /// Pieces skipped because they were already registered.
    pub already_registered: Vec<PieceCid>,
    /// Pieces held by a concurrent migration.
    pub in_flight: Vec<PieceCid>,
    /// Deals that were not eligible.
    pub ineligible: Vec<IneligibleDeal>,
    /// Later deals for a piece an earlier deal in the same batch settled.
    pub duplicates: Vec<DealId>,
    /// Deals that failed and were skipped.
    pub failures: Vec<DealFailure>,
}

impl MigrationReport {
    /// At least one shard was registered by this run.
    pub fn any_newly_migrated(&self) -> bool {
        !self.newly_registered.is_empty()
    }

    /// Shards registered lazily.
    pub fn lazy_count(&self) -> usize {
        self.newly_registered.iter().filter(|s| s.lazy).count()
    }

    /// Shards registered eagerly.
    pub fn eager_count(&self) -> usize {
        self.newly_registered.len() - self.lazy_count()
    }

    /// Record the outcome of one eligible piece.
    pub fn record(&mut self, deal_id: DealId, piece_cid: PieceCid, disposition: DealDisposition) {
        match disposition {
            DealDisposition::Registered { lazy } => self.newly_registered.push(RegisteredShard {
                piece_cid,
                deal_id,
                lazy,
            }),
            DealDisposition::Reconciled => self.reconciled.push(piece_cid),
            DealDisposition::AlreadyRegistered => self.already_registered.push(piece_cid),
            DealDisposition::InFlight => self.in_flight.push(piece_cid),
            DealDisposition::Failed(kind) => self.failures.push(DealFailure {
                deal_id,
                piece_cid,
                kind,
            }),
        }
    }

    /// Record a deal that was filtered out.
    pub fn record_ineligible(&mut self, deal_id: DealId, state: DealState, reason: Eligibility) {
        self.ineligible.push(IneligibleDeal {
            deal_id,
            state,
            reason,
        });
    }

    /// Put every list in a stable order.
    pub fn finish(&mut self) {
        self.newly_registered.sort_by(|a, b| a.piece_cid.cmp(&b.piece_cid));
        self.reconciled.sort();
        self.already_registered.sort();
        self.in_flight.sort();
        self.ineligible.sort_by_key(|d| d.deal_id);
        self.duplicates.sort_unstable();
        self.failures.sort_by_key(|f| f.deal_id);
    }
}
