//! # Core Domain Entities
//!
//! Defines the storage-deal entities consumed by the migration layer.
//!
//! ## Clusters
//!
//! - **Content**: `PieceCid`, `ShardKey`
//! - **Storage**: `SectorNumber`, `PieceLocation`
//! - **Deals**: `DealState`, `DealRecord`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypeError;

// =============================================================================
// CLUSTER A: CONTENT
// =============================================================================

/// Sector number assigned by the sealing pipeline.
pub type SectorNumber = u64;

/// On-chain deal identifier.
pub type DealId = u64;

/// Content identifier of a piece (e.g. `baga6ea4sea...`).
///
/// Only the textual form is carried; the migration layer never decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PieceCid(String);

impl PieceCid {
    /// Parse a piece CID from its textual form.
    pub fn new(cid: impl Into<String>) -> Result<Self, TypeError> {
        let cid = cid.into();
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypeError::InvalidPieceCid(cid));
        }
        Ok(Self(cid))
    }

    /// Textual form of the CID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PieceCid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PieceCid {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PieceCid> for String {
    fn from(cid: PieceCid) -> Self {
        cid.0
    }
}

/// Key under which a shard is registered in the shard index.
///
/// One shard per piece: the key is the piece CID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey(PieceCid);

impl ShardKey {
    /// Piece this shard serves.
    pub fn piece_cid(&self) -> &PieceCid {
        &self.0
    }
}

impl From<PieceCid> for ShardKey {
    fn from(cid: PieceCid) -> Self {
        Self(cid)
    }
}

impl From<&PieceCid> for ShardKey {
    fn from(cid: &PieceCid) -> Self {
        Self(cid.clone())
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// CLUSTER B: STORAGE
// =============================================================================

/// Where a piece's bytes live inside a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceLocation {
    /// Sector holding the piece.
    pub sector: SectorNumber,
    /// Unpadded byte offset of the piece inside the sector.
    pub offset: u64,
    /// Unpadded length of the piece.
    pub length: u64,
}

impl PieceLocation {
    /// Create a new location.
    pub fn new(sector: SectorNumber, offset: u64, length: u64) -> Self {
        Self {
            sector,
            offset,
            length,
        }
    }
}

// =============================================================================
// CLUSTER C: DEALS
// =============================================================================

/// Lifecycle state of a storage deal on the provider side.
///
/// Variants are listed in the order a healthy deal moves through them; the
/// failure and terminal states come last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealState {
    /// State could not be determined.
    Unknown,
    /// Proposal validation in progress.
    Validating,
    /// Proposal accepted, waiting for acceptance checks.
    AcceptWait,
    /// Waiting for the client to start data transfer.
    WaitingForData,
    /// Data transfer in progress.
    Transferring,
    /// Verifying received data against the piece CID.
    VerifyData,
    /// Reserving provider collateral.
    ReserveProviderFunds,
    /// Provider collateral reserved.
    FundsReserved,
    /// Publishing the deal on chain.
    Publish,
    /// Waiting for the publish message to land.
    Publishing,
    /// Piece handed to the sealing pipeline.
    Staged,
    /// Waiting for the sector pre-commit.
    AwaitingPreCommit,
    /// Sector containing the piece is being sealed.
    Sealing,
    /// Sealing finished, local bookkeeping in progress.
    Finalizing,
    /// Deal is active on chain.
    Active,
    /// Deal ended normally.
    Expired,
    /// Deal was slashed.
    Slashed,
    /// Proposal was rejected.
    Rejecting,
    /// Deal is being failed.
    Failing,
    /// Deal errored out.
    Error,
}

impl DealState {
    /// Every state, in lifecycle order.
    pub const ALL: [DealState; 20] = [
        DealState::Unknown,
        DealState::Validating,
        DealState::AcceptWait,
        DealState::WaitingForData,
        DealState::Transferring,
        DealState::VerifyData,
        DealState::ReserveProviderFunds,
        DealState::FundsReserved,
        DealState::Publish,
        DealState::Publishing,
        DealState::Staged,
        DealState::AwaitingPreCommit,
        DealState::Sealing,
        DealState::Finalizing,
        DealState::Active,
        DealState::Expired,
        DealState::Slashed,
        DealState::Rejecting,
        DealState::Failing,
        DealState::Error,
    ];

    /// The deal failed or ended and will never hold data again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::Slashed | Self::Rejecting | Self::Failing | Self::Error
        )
    }

    /// The provider has committed the piece to a sector.
    pub fn has_reached_sealing(&self) -> bool {
        matches!(self, Self::Sealing | Self::Finalizing | Self::Active)
    }

    /// The deal is still live (not in a terminal state).
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Unknown
    }

    /// Canonical name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Validating => "Validating",
            Self::AcceptWait => "AcceptWait",
            Self::WaitingForData => "WaitingForData",
            Self::Transferring => "Transferring",
            Self::VerifyData => "VerifyData",
            Self::ReserveProviderFunds => "ReserveProviderFunds",
            Self::FundsReserved => "FundsReserved",
            Self::Publish => "Publish",
            Self::Publishing => "Publishing",
            Self::Staged => "Staged",
            Self::AwaitingPreCommit => "AwaitingPreCommit",
            Self::Sealing => "Sealing",
            Self::Finalizing => "Finalizing",
            Self::Active => "Active",
            Self::Expired => "Expired",
            Self::Slashed => "Slashed",
            Self::Rejecting => "Rejecting",
            Self::Failing => "Failing",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DealState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name() == s)
            .ok_or_else(|| TypeError::UnknownDealState(s.to_string()))
    }
}

/// Snapshot of a provider-side deal, supplied wholesale on each migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRecord {
    /// On-chain deal id.
    pub deal_id: DealId,
    /// Piece the deal stores.
    pub piece_cid: PieceCid,
    /// Current lifecycle state.
    pub state: DealState,
    /// Sector the piece was placed in.
    pub sector: SectorNumber,
}

impl DealRecord {
    /// Create a new deal record.
    pub fn new(deal_id: DealId, piece_cid: PieceCid, state: DealState, sector: SectorNumber) -> Self {
        Self {
            deal_id,
            piece_cid,
            state,
            sector,
        }
    }

    /// Derived from the lifecycle state.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Shard key for this deal's piece.
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::from(&self.piece_cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> PieceCid {
        PieceCid::new(s).unwrap()
    }

    #[test]
    fn test_piece_cid_rejects_empty() {
        assert!(PieceCid::new("").is_err());
    }

    #[test]
    fn test_piece_cid_rejects_separators() {
        assert!(PieceCid::new("baga/6ea").is_err());
        assert!(PieceCid::new("baga 6ea").is_err());
    }

    #[test]
    fn test_piece_cid_display_roundtrip() {
        let piece = cid("baga6ea4seaqao7s73y24kcutaosvacpdjgfe5pw76ooefnyqw4ynr3d2y6x2mpq");
        let parsed: PieceCid = piece.to_string().parse().unwrap();
        assert_eq!(piece, parsed);
    }

    #[test]
    fn test_piece_cid_serde_validates() {
        let result: Result<PieceCid, _> = serde_json::from_str("\"not a cid\"");
        assert!(result.is_err());

        let ok: PieceCid = serde_json::from_str("\"bagaabc\"").unwrap();
        assert_eq!(ok.as_str(), "bagaabc");
    }

    #[test]
    fn test_shard_key_wraps_piece() {
        let piece = cid("bagaabc");
        let key = ShardKey::from(&piece);
        assert_eq!(key.piece_cid(), &piece);
        assert_eq!(key.to_string(), "bagaabc");
    }

    #[test]
    fn test_sealing_milestone() {
        assert!(DealState::Sealing.has_reached_sealing());
        assert!(DealState::Finalizing.has_reached_sealing());
        assert!(DealState::Active.has_reached_sealing());
        assert!(!DealState::FundsReserved.has_reached_sealing());
        assert!(!DealState::AwaitingPreCommit.has_reached_sealing());
        assert!(!DealState::Expired.has_reached_sealing());
    }

    #[test]
    fn test_terminal_states_are_inactive() {
        for state in DealState::ALL {
            if state.is_terminal() {
                assert!(!state.is_active(), "{state} should be inactive");
            }
        }
        assert!(!DealState::Unknown.is_active());
        assert!(DealState::Sealing.is_active());
    }

    #[test]
    fn test_deal_state_parse_all_names() {
        for state in DealState::ALL {
            assert_eq!(state.name().parse::<DealState>().unwrap(), state);
        }
        assert!("Bogus".parse::<DealState>().is_err());
    }

    #[test]
    fn test_deal_record_derived_fields() {
        let deal = DealRecord::new(7, cid("bagaabc"), DealState::Error, 3);
        assert!(!deal.is_active());
        assert_eq!(deal.shard_key().piece_cid().as_str(), "bagaabc");
    }
}
