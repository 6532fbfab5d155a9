//! # Shared Types Crate
//!
//! Piece, sector and deal types shared between the migration core and the
//! adapters that surround it.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Deal records and piece identifiers are defined
//!   once, here.
//! - **Immutable Inputs**: A `DealRecord` is a snapshot owned by the caller;
//!   nothing in the migration layer mutates it.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
