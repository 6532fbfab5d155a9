//! # Registration State
//!
//! Set of piece CIDs that have a registered shard, plus the claims held by
//! migrations currently registering a piece.
//!
//! A piece moves through `claimed -> committed` under a single lock, so two
//! concurrent migrations can never both register the same piece. Entries are
//! never removed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::PieceCid;

use super::errors::RegistrationStoreError;
use crate::ports::outbound::RegistrationStore;

/// Outcome of `RegistrationState::try_claim`.
pub enum Claim<'a> {
    /// The caller now owns the piece and must register it.
    Claimed(RegistrationClaim<'a>),
    /// The piece was registered by an earlier run.
    AlreadyRegistered,
    /// Another migration holds the claim right now.
    InFlight,
}

/// Exclusive right to register one piece.
///
/// Released on drop unless committed.
pub struct RegistrationClaim<'a> {
    state: &'a RegistrationState,
    piece: Option<PieceCid>,
}

impl RegistrationClaim<'_> {
    /// Record the piece as registered and release the claim.
    pub fn commit(mut self) -> Result<(), RegistrationStoreError> {
        let Some(piece) = self.piece.take() else {
            return Ok(());
        };
        let result = self.state.store.insert(&piece).map(|_| ());
        self.state.claims.lock().remove(&piece);
        result
    }
}

impl Drop for RegistrationClaim<'_> {
    fn drop(&mut self) {
        if let Some(piece) = self.piece.take() {
            self.state.claims.lock().remove(&piece);
        }
    }
}

/// Registered pieces shared by every migration run of one coordinator.
pub struct RegistrationState {
    store: Arc<dyn RegistrationStore>,
    claims: Mutex<HashSet<PieceCid>>,
}

impl RegistrationState {
    /// State backed by `store`.
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self {
            store,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Whether `piece` has been committed.
    pub fn is_registered(&self, piece: &PieceCid) -> Result<bool, RegistrationStoreError> {
        self.store.contains(piece)
    }

    /// Atomically check `piece` and claim it if nobody has.
    pub fn try_claim(&self, piece: &PieceCid) -> Result<Claim<'_>, RegistrationStoreError> {
        let mut claims = self.claims.lock();
        if claims.contains(piece) {
            return Ok(Claim::InFlight);
        }
        if self.store.contains(piece)? {
            return Ok(Claim::AlreadyRegistered);
        }
        claims.insert(piece.clone());
        Ok(Claim::Claimed(RegistrationClaim {
            state: self,
            piece: Some(piece.clone()),
        }))
    }

    /// Every committed piece, sorted.
    pub fn registered_pieces(&self) -> Result<Vec<PieceCid>, RegistrationStoreError> {
        self.store.list()
    }

    /// Number of committed pieces.
    pub fn len(&self) -> Result<usize, RegistrationStoreError> {
        Ok(self.store.list()?.len())
    }

    /// No piece has been committed yet.
    pub fn is_empty(&self) -> Result<bool, RegistrationStoreError> {
        Ok(self.len()? == 0)
    }

    /// Claims currently held.
    pub fn in_flight(&self) -> usize {
        self.claims.lock().len()
    }
}

impl fmt::Debug for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationState")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryRegistrationStore;

    fn in_memory() -> RegistrationState {
        RegistrationState::new(Arc::new(InMemoryRegistrationStore::new()))
    }

    fn piece(s: &str) -> PieceCid {
        PieceCid::new(s).unwrap()
    }

    #[test]
    fn test_claim_then_commit() {
        let state = in_memory();
        let p = piece("baga1");

        let Claim::Claimed(claim) = state.try_claim(&p).unwrap() else {
            panic!("expected claim");
        };
        assert_eq!(state.in_flight(), 1);
        assert!(!state.is_registered(&p).unwrap());

        claim.commit().unwrap();
        assert_eq!(state.in_flight(), 0);
        assert!(state.is_registered(&p).unwrap());
        assert!(matches!(
            state.try_claim(&p).unwrap(),
            Claim::AlreadyRegistered
        ));
    }

    #[test]
    fn test_second_claim_sees_in_flight() {
        let state = in_memory();
        let p = piece("baga1");

        let first = state.try_claim(&p).unwrap();
        assert!(matches!(first, Claim::Claimed(_)));
        assert!(matches!(state.try_claim(&p).unwrap(), Claim::InFlight));
    }

    #[test]
    fn test_dropped_claim_is_released() {
        let state = in_memory();
        let p = piece("baga1");

        {
            let _claim = state.try_claim(&p).unwrap();
        }
        assert_eq!(state.in_flight(), 0);
        assert!(!state.is_registered(&p).unwrap());
        assert!(matches!(state.try_claim(&p).unwrap(), Claim::Claimed(_)));
    }

    #[test]
    fn test_registered_pieces_sorted() {
        let state = in_memory();
        for s in ["bagac", "bagaa", "bagab"] {
            if let Claim::Claimed(c) = state.try_claim(&piece(s)).unwrap() {
                c.commit().unwrap();
            }
        }
        let pieces = state.registered_pieces().unwrap();
        assert_eq!(pieces, vec![piece("bagaa"), piece("bagab"), piece("bagac")]);
        assert_eq!(state.len().unwrap(), 3);
        assert!(!state.is_empty().unwrap());
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let state = Arc::new(in_memory());
        let p = piece("bagashared");

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let p = p.clone();
                    scope.spawn(move || match state.try_claim(&p).unwrap() {
                        Claim::Claimed(c) => {
                            c.commit().unwrap();
                            1
                        }
                        _ => 0,
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(state.len().unwrap(), 1);
    }
}
