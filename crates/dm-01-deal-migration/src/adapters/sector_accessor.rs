//! In-memory sector accessor implementing the `SectorAccessor` port.
//!
//! Tracks probe and unseal calls plus the peak number of concurrent unseals
//! so callers can check that lazy mounts stay lazy and throttled.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::SectorNumber;
use tracing::debug;

use crate::domain::{PlainStream, SectorAccessError, SectorStream, SeekableStream};
use crate::ports::outbound::SectorAccessor;

struct SectorData {
    bytes: Vec<u8>,
    unsealed: bool,
}

impl SectorData {
    /// Byte range of `offset..offset + length`, checked against the contents.
    fn range(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
    ) -> Result<std::ops::Range<usize>, SectorAccessError> {
        let size = self.bytes.len() as u64;
        match offset.checked_add(length) {
            Some(end) if end <= size => Ok(offset as usize..end as usize),
            _ => Err(SectorAccessError::RangeOutOfBounds {
                sector,
                offset,
                length,
                size,
            }),
        }
    }
}

/// Sector accessor kept in memory.
pub struct InMemorySectorAccessor {
    sectors: RwLock<HashMap<SectorNumber, SectorData>>,
    failing_probes: RwLock<HashSet<SectorNumber>>,
    seekable: bool,
    unseal_delay: Option<Duration>,
    unavailable: AtomicBool,
    probe_calls: AtomicUsize,
    unseal_calls: AtomicUsize,
    unseals_in_flight: AtomicUsize,
    peak_unseals: AtomicUsize,
}

impl Default for InMemorySectorAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySectorAccessor {
    /// Accessor producing sequential-only streams.
    pub fn new() -> Self {
        Self {
            sectors: RwLock::new(HashMap::new()),
            failing_probes: RwLock::new(HashSet::new()),
            seekable: false,
            unseal_delay: None,
            unavailable: AtomicBool::new(false),
            probe_calls: AtomicUsize::new(0),
            unseal_calls: AtomicUsize::new(0),
            unseals_in_flight: AtomicUsize::new(0),
            peak_unseals: AtomicUsize::new(0),
        }
    }

    /// Produce seekable streams instead.
    pub fn with_seekable_streams(mut self) -> Self {
        self.seekable = true;
        self
    }

    /// Sleep this long inside every unseal.
    pub fn with_unseal_delay(mut self, delay: Duration) -> Self {
        self.unseal_delay = Some(delay);
        self
    }

    /// Store a sector's contents.
    pub fn add_sector(&self, sector: SectorNumber, bytes: Vec<u8>, unsealed: bool) {
        self.sectors
            .write()
            .insert(sector, SectorData { bytes, unsealed });
    }

    /// Make availability probes on `sector` fail.
    pub fn fail_probes_for(&self, sector: SectorNumber) {
        self.failing_probes.write().insert(sector);
    }

    /// Fail every call while `true`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether an unsealed copy of `sector` exists now.
    pub fn is_sector_unsealed(&self, sector: SectorNumber) -> bool {
        self.sectors.read().get(&sector).is_some_and(|s| s.unsealed)
    }

    /// Availability probes served.
    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Unseals started.
    pub fn unseal_calls(&self) -> usize {
        self.unseal_calls.load(Ordering::SeqCst)
    }

    /// Highest number of unseals seen running at once.
    pub fn peak_concurrent_unseals(&self) -> usize {
        self.peak_unseals.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SectorAccessor for InMemorySectorAccessor {
    async fn is_unsealed(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
    ) -> Result<bool, SectorAccessError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SectorAccessError::Unavailable("sector accessor offline".into()));
        }
        if self.failing_probes.read().contains(&sector) {
            return Err(SectorAccessError::Unavailable(format!(
                "probe of sector {sector} failed"
            )));
        }

        let sectors = self.sectors.read();
        let data = sectors
            .get(&sector)
            .ok_or(SectorAccessError::SectorNotFound(sector))?;
        data.range(sector, offset, length)?;
        Ok(data.unsealed)
    }

    async fn unseal_range(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn SectorStream>, SectorAccessError> {
        self.unseal_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard::enter(&self.unseals_in_flight, &self.peak_unseals);
        debug!("[dm-01] Unsealing sector {} range {}+{}", sector, offset, length);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SectorAccessError::Unavailable("sector accessor offline".into()));
        }
        if let Some(delay) = self.unseal_delay {
            tokio::time::sleep(delay).await;
        }

        // Checked and copied under one lock so a concurrent `add_sector` cannot
        // shrink the sector in between.
        let bytes = {
            let mut sectors = self.sectors.write();
            let data = sectors
                .get_mut(&sector)
                .ok_or(SectorAccessError::SectorNotFound(sector))?;
            let range = data.range(sector, offset, length)?;
            data.unsealed = true;
            data.bytes[range].to_vec()
        };

        let stream: Box<dyn SectorStream> = if self.seekable {
            Box::new(SeekableStream::new(Cursor::new(bytes)))
        } else {
            Box::new(PlainStream::new(Cursor::new(bytes)))
        };
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_probe_does_not_unseal() {
        let accessor = InMemorySectorAccessor::new();
        accessor.add_sector(1, vec![7; 64], false);

        assert!(!accessor.is_unsealed(1, 0, 64).await.unwrap());
        assert_eq!(accessor.probe_calls(), 1);
        assert_eq!(accessor.unseal_calls(), 0);
        assert!(!accessor.is_sector_unsealed(1));
    }

    #[tokio::test]
    async fn test_unseal_returns_range_and_marks_unsealed() {
        let accessor = InMemorySectorAccessor::new();
        accessor.add_sector(1, (0u8..64).collect(), false);

        let mut stream = accessor.unseal_range(1, 8, 4).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        assert_eq!(out, vec![8, 9, 10, 11]);
        assert!(accessor.is_sector_unsealed(1));
        assert_eq!(accessor.peak_concurrent_unseals(), 1);
    }

    #[tokio::test]
    async fn test_stream_capabilities_follow_config() {
        let plain = InMemorySectorAccessor::new();
        plain.add_sector(1, vec![0; 8], true);
        let seekable = InMemorySectorAccessor::new().with_seekable_streams();
        seekable.add_sector(1, vec![0; 8], true);

        assert!(!plain.unseal_range(1, 0, 8).await.unwrap().capabilities().seek);
        assert!(seekable.unseal_range(1, 0, 8).await.unwrap().capabilities().seek);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let accessor = InMemorySectorAccessor::new();
        accessor.add_sector(1, vec![0; 16], true);
        assert!(matches!(
            accessor.is_unsealed(1, 8, 16).await,
            Err(SectorAccessError::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sector_shrunk_during_unseal_is_out_of_range() {
        let accessor = InMemorySectorAccessor::new().with_unseal_delay(Duration::from_millis(50));
        accessor.add_sector(1, vec![0; 64], false);

        // The unseal is parked in its delay when the sector is replaced.
        let (unsealed, ()) = tokio::join!(accessor.unseal_range(1, 32, 32), async {
            accessor.add_sector(1, vec![0; 16], false);
        });

        assert!(matches!(
            unsealed,
            Err(SectorAccessError::RangeOutOfBounds { size: 16, .. })
        ));
        assert!(!accessor.is_sector_unsealed(1));
    }

    #[tokio::test]
    async fn test_unknown_sector() {
        let accessor = InMemorySectorAccessor::new();
        assert_eq!(
            accessor.is_unsealed(9, 0, 1).await,
            Err(SectorAccessError::SectorNotFound(9))
        );
    }

    #[tokio::test]
    async fn test_failing_probe() {
        let accessor = InMemorySectorAccessor::new();
        accessor.add_sector(3, vec![0; 16], true);
        accessor.fail_probes_for(3);
        assert!(matches!(
            accessor.is_unsealed(3, 0, 16).await,
            Err(SectorAccessError::Unavailable(_))
        ));
    }
}
