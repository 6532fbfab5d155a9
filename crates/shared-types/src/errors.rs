//! # Error Types
//!
//! Errors raised while constructing shared types.

use thiserror::Error;

/// Errors that can occur when parsing or building shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Piece CID is empty or contains characters outside the base32/base58 alphabet.
    #[error("Invalid piece CID: {0:?}")]
    InvalidPieceCid(String),

    /// Deal state name is not recognised.
    #[error("Unknown deal state: {0}")]
    UnknownDealState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_piece_cid_error() {
        let err = TypeError::InvalidPieceCid("bad cid".to_string());
        assert!(err.to_string().contains("bad cid"));
    }

    #[test]
    fn test_unknown_deal_state_error() {
        let err = TypeError::UnknownDealState("Bogus".to_string());
        assert!(err.to_string().contains("Bogus"));
    }
}
