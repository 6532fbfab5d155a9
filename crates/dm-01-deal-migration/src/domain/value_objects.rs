//! # Domain Value Objects
//!
//! Immutable value types for Deal Migration.

use serde::{Deserialize, Serialize};
use shared_types::ShardKey;
use std::fmt;

/// Whether a sector's unsealed copy can be read right now.
///
/// Computed per deal at migration time and never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorAccessState {
    /// An unsealed copy exists; the index may initialize the shard immediately.
    Unsealed,
    /// Only the sealed copy exists; reading requires an unseal.
    SealedDeferred,
}

impl SectorAccessState {
    /// Map an availability probe result.
    pub fn from_probe(unsealed: bool) -> Self {
        if unsealed {
            Self::Unsealed
        } else {
            Self::SealedDeferred
        }
    }

    /// Sealed sectors are registered lazily.
    pub fn register_lazily(&self) -> bool {
        matches!(self, Self::SealedDeferred)
    }
}

/// Options passed with a shard registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOptions {
    /// Defer initialization until the shard is first acquired.
    pub lazy: bool,
}

impl RegisterOptions {
    /// Options for a given access state.
    pub fn for_access(access: SectorAccessState) -> Self {
        Self {
            lazy: access.register_lazily(),
        }
    }
}

/// Optional stream capability beyond sequential read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Repositioning the stream cursor.
    Seek,
    /// Positional reads that do not move the cursor.
    ReadAt,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seek => f.write_str("seek"),
            Self::ReadAt => f.write_str("read-at"),
        }
    }
}

/// Capabilities a sector stream actually has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCapabilities {
    /// Supports `Seek`.
    pub seek: bool,
    /// Supports `ReadAt`.
    pub read_at: bool,
}

impl StreamCapabilities {
    /// Sequential read only.
    pub const READ_ONLY: Self = Self {
        seek: false,
        read_at: false,
    };

    /// Read, seek and positional read.
    pub const FULL: Self = Self {
        seek: true,
        read_at: true,
    };

    /// Check a single capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Seek => self.seek,
            Capability::ReadAt => self.read_at,
        }
    }
}

/// Result of `Mount::stat`, computed without unsealing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountStat {
    /// The sector is known to the accessor.
    pub exists: bool,
    /// Size of the piece in bytes.
    pub size: u64,
    /// Data can be read without an unseal.
    pub ready: bool,
}

/// Shard lifecycle inside the shard index.
///
/// ```text
/// New ──► Initializing ──► Available ◄──► Serving
///              │               │             │
///              └──────────► Errored ◄────────┘
///                            │  ▲
///                            ▼  │
///                         Recovering ──► Available
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ShardState {
    /// Registered, not yet initialized.
    #[default]
    New,
    /// Mount opened, index being built.
    Initializing,
    /// Indexed and ready to serve.
    Available,
    /// At least one reader holds the shard.
    Serving,
    /// Recovery of an errored shard in progress.
    Recovering,
    /// Initialization or serving failed.
    Errored,
}

impl ShardState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ShardState) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Initializing)
                | (Self::Initializing, Self::Available)
                | (Self::Initializing, Self::Errored)
                | (Self::Available, Self::Serving)
                | (Self::Available, Self::Errored)
                | (Self::Serving, Self::Available)
                | (Self::Serving, Self::Errored)
                | (Self::Errored, Self::Recovering)
                | (Self::Recovering, Self::Available)
                | (Self::Recovering, Self::Errored)
        )
    }

    /// Data can be read from the shard.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Available | Self::Serving)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Initializing => "Initializing",
            Self::Available => "Available",
            Self::Serving => "Serving",
            Self::Recovering => "Recovering",
            Self::Errored => "Errored",
        };
        f.write_str(name)
    }
}

/// Read-only view of a shard owned by the shard index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard key (piece CID).
    pub key: ShardKey,
    /// Current lifecycle state.
    pub state: ShardState,
    /// Registered with lazy initialization.
    pub lazy: bool,
    /// Last error, if the shard is errored.
    pub error: Option<String>,
}
