//! # Ports Layer (Hexagonal Architecture)
//!
//! - **Inbound**: `DealMigrationApi`, what callers can ask of the subsystem
//! - **Outbound**: piece locator, sector accessor, mount, shard index and
//!   registration persistence

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
