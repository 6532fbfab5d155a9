//! # Domain Errors
//!
//! Error types for the Deal Migration subsystem.
//!
//! Errors split into two families:
//! - **Per-deal** (`DealFailureKind`): recovered locally, the deal is skipped
//!   and reported, the batch continues.
//! - **Systemic** (`MigrationError`): fatal to the batch and returned to the
//!   caller. Pieces registered before the failure stay registered.

use shared_types::{DealId, PieceCid, SectorNumber, ShardKey};
use thiserror::Error;

use super::value_objects::{Capability, ShardState};

/// Piece Locator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// The piece store has no record of the piece.
    #[error("Piece not found: {0}")]
    PieceNotFound(PieceCid),

    /// The piece is known but not recorded in the given sector.
    #[error("Piece {piece} has no deal in sector {sector}")]
    NotInSector {
        /// Piece looked up
        piece: PieceCid,
        /// Sector the deal claimed
        sector: SectorNumber,
    },

    /// The piece store could not be queried.
    #[error("Piece store unavailable: {0}")]
    Unavailable(String),
}

/// Sector Data Accessor errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectorAccessError {
    /// Sector is unknown to the accessor.
    #[error("Sector not found: {0}")]
    SectorNotFound(SectorNumber),

    /// Requested range lies outside the sector.
    #[error("Range {offset}+{length} out of bounds for sector {sector} ({size} bytes)")]
    RangeOutOfBounds {
        /// Sector read
        sector: SectorNumber,
        /// Requested offset
        offset: u64,
        /// Requested length
        length: u64,
        /// Sector size
        size: u64,
    },

    /// The unseal operation itself failed.
    #[error("Unseal of sector {sector} failed: {reason}")]
    UnsealFailed {
        /// Sector being unsealed
        sector: SectorNumber,
        /// Failure reason
        reason: String,
    },

    /// The accessor could not be reached.
    #[error("Sector accessor unavailable: {0}")]
    Unavailable(String),
}

/// Shard Index errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardIndexError {
    /// A shard with this key already exists.
    #[error("Shard already registered: {0}")]
    AlreadyRegistered(ShardKey),

    /// The index refused this specific shard.
    #[error("Shard {key} rejected: {reason}")]
    Rejected {
        /// Shard refused
        key: ShardKey,
        /// Reason given by the index
        reason: String,
    },

    /// No shard with this key.
    #[error("Unknown shard: {0}")]
    UnknownShard(ShardKey),

    /// Shard state machine refused the transition.
    #[error("Invalid shard transition for {key}: {from} -> {to}")]
    InvalidTransition {
        /// Shard
        key: ShardKey,
        /// Current state
        from: ShardState,
        /// Attempted state
        to: ShardState,
    },

    /// The shard's mount could not be read.
    #[error("Mount failed for {key}: {reason}")]
    MountFailed {
        /// Shard
        key: ShardKey,
        /// Underlying mount error
        reason: String,
    },

    /// The index cannot accept any work.
    #[error("Shard index unavailable: {0}")]
    Unavailable(String),

    /// The index dropped the job before answering.
    #[error("Shard index closed")]
    Closed,
}

impl ShardIndexError {
    /// Systemic errors abort the whole migration batch.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Closed)
    }
}

/// Mount and stream errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    /// The underlying stream lacks this capability.
    #[error("Unsupported stream capability: {0}")]
    Unsupported(Capability),

    /// The sector accessor failed.
    #[error("Sector access failed: {0}")]
    Access(#[from] SectorAccessError),

    /// I/O on the stream failed.
    #[error("Stream I/O failed: {0}")]
    Io(String),

    /// The unseal throttle was shut down.
    #[error("Unseal throttle closed")]
    ThrottleClosed,
}

impl From<std::io::Error> for MountError {
    fn from(err: std::io::Error) -> Self {
        MountError::Io(err.to_string())
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// Disk or file I/O failed.
    #[error("KV store I/O error: {message}")]
    IOError {
        /// Failure description
        message: String,
    },

    /// Stored bytes could not be (de)serialized.
    #[error("KV store serialization error: {message}")]
    Serialization {
        /// Failure description
        message: String,
    },
}

/// Registration store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationStoreError {
    /// Backing key-value store failed.
    #[error("Registration store backend failed: {0}")]
    Backend(#[from] KVStoreError),

    /// A stored key could not be decoded as a piece CID.
    #[error("Corrupt registration entry: {key}")]
    CorruptEntry {
        /// Raw key
        key: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("Invalid config field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was refused
        reason: String,
    },
}

/// Why a single deal was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DealFailureKind {
    /// Location lookup failed.
    #[error("location lookup failed: {0}")]
    Locate(LocatorError),

    /// Availability probe failed.
    #[error("availability probe failed: {0}")]
    Probe(SectorAccessError),

    /// The shard index refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(ShardIndexError),
}

impl DealFailureKind {
    /// Metric label for this failure.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Locate(_) => "locate",
            Self::Probe(_) => "probe",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// A deal that could not be migrated in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealFailure {
    /// Deal that failed.
    pub deal_id: DealId,
    /// Piece of that deal.
    pub piece_cid: PieceCid,
    /// What went wrong.
    pub kind: DealFailureKind,
}

/// Errors returned by a migration run.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// The run was cancelled; `registered` pieces were committed before that.
    #[error("Migration cancelled after registering {registered} shard(s)")]
    Cancelled {
        /// Shards newly registered before cancellation
        registered: usize,
    },

    /// The shard index is unreachable.
    #[error("Shard index unavailable: {0}")]
    IndexUnavailable(ShardIndexError),

    /// Registration bookkeeping could not be read or persisted.
    #[error("Registration state failure: {0}")]
    RegistrationStore(#[from] RegistrationStoreError),

    /// Service configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ShardKey {
        ShardKey::from(PieceCid::new(s).unwrap())
    }

    #[test]
    fn test_systemic_classification() {
        assert!(ShardIndexError::Unavailable("down".into()).is_systemic());
        assert!(ShardIndexError::Closed.is_systemic());
        assert!(!ShardIndexError::AlreadyRegistered(key("baga1")).is_systemic());
        assert!(!ShardIndexError::Rejected {
            key: key("baga1"),
            reason: "bad mount".into()
        }
        .is_systemic());
    }

    #[test]
    fn test_failure_labels() {
        let locate = DealFailureKind::Locate(LocatorError::Unavailable("x".into()));
        let probe = DealFailureKind::Probe(SectorAccessError::SectorNotFound(1));
        let rejected = DealFailureKind::Rejected(ShardIndexError::Closed);
        assert_eq!(locate.label(), "locate");
        assert_eq!(probe.label(), "probe");
        assert_eq!(rejected.label(), "rejected");
    }

    #[test]
    fn test_range_error_display() {
        let err = SectorAccessError::RangeOutOfBounds {
            sector: 4,
            offset: 100,
            length: 50,
            size: 120,
        };
        let msg = err.to_string();
        assert!(msg.contains("100+50"));
        assert!(msg.contains("sector 4"));
    }

    #[test]
    fn test_unsupported_display() {
        let err = MountError::Unsupported(Capability::Seek);
        assert!(err.to_string().contains("seek"));
    }

    #[test]
    fn test_cancelled_display() {
        let err = MigrationError::Cancelled { registered: 3 };
        assert!(err.to_string().contains('3'));
    }
}
