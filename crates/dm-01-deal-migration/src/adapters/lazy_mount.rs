//! # Lazy Sector Mount
//!
//! Mount handed to the shard index for every migrated piece. Construction
//! does no I/O; the sector is only read (and unsealed if needed) when the
//! index calls `fetch`.
//!
//! Unseals are expensive, so `fetch` holds a permit from a semaphore shared by
//! every mount of one coordinator for the duration of the unseal call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shard_telemetry::{metric_inc, UNSEALS_STARTED};
use shared_types::PieceLocation;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::domain::{MountError, MountReader, MountStat, SectorAccessError};
use crate::ports::outbound::{Mount, SectorAccessor};

/// Mount that defers all sector access until fetched.
pub struct LazySectorMount<A: SectorAccessor> {
    accessor: Arc<A>,
    location: PieceLocation,
    throttle: Arc<Semaphore>,
}

impl<A: SectorAccessor> LazySectorMount<A> {
    /// Mount over `location`. Does not touch the accessor.
    pub fn new(accessor: Arc<A>, location: PieceLocation, throttle: Arc<Semaphore>) -> Self {
        Self {
            accessor,
            location,
            throttle,
        }
    }
}

#[async_trait]
impl<A: SectorAccessor> Mount for LazySectorMount<A> {
    async fn fetch(&self) -> Result<MountReader, MountError> {
        let PieceLocation {
            sector,
            offset,
            length,
        } = self.location;

        let stream = {
            let _permit = self
                .throttle
                .acquire()
                .await
                .map_err(|_| MountError::ThrottleClosed)?;
            metric_inc!(UNSEALS_STARTED);
            debug!("[dm-01] Fetching sector {} range {}+{}", sector, offset, length);
            self.accessor.unseal_range(sector, offset, length).await?
        };

        Ok(MountReader::new(stream))
    }

    async fn stat(&self) -> Result<MountStat, MountError> {
        let PieceLocation {
            sector,
            offset,
            length,
        } = self.location;

        match self.accessor.is_unsealed(sector, offset, length).await {
            Ok(ready) => Ok(MountStat {
                exists: true,
                size: length,
                ready,
            }),
            Err(SectorAccessError::SectorNotFound(_)) => Ok(MountStat {
                exists: false,
                size: length,
                ready: false,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> PieceLocation {
        self.location
    }
}

impl<A: SectorAccessor> fmt::Debug for LazySectorMount<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySectorMount")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
