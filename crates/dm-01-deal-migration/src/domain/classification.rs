//! # Deal Classification
//!
//! Decides which deal records should have a shard.
//!
//! A deal is eligible iff it is still active AND has reached the sealing
//! milestone (the provider has committed the piece to a sector).

use shared_types::{DealRecord, DealState};

/// Classification of a single deal record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// Register a shard for this deal's piece.
    Eligible,
    /// Deal failed or ended.
    Inactive(DealState),
    /// Deal has not reached sealing yet.
    PreSealing(DealState),
}

impl Eligibility {
    /// Shorthand for `== Eligible`.
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Inactive(_) => "inactive",
            Self::PreSealing(_) => "pre_sealing",
        }
    }
}

/// Classify a deal record.
pub fn classify(deal: &DealRecord) -> Eligibility {
    if !deal.is_active() {
        return Eligibility::Inactive(deal.state);
    }
    if !deal.state.has_reached_sealing() {
        return Eligibility::PreSealing(deal.state);
    }
    Eligibility::Eligible
}
