//! # Capability-Tagged Streams
//!
//! Sector accessors hand back streams that always support sequential read and
//! may or may not support seek and positional read. The capability set is
//! explicit: a missing capability yields `MountError::Unsupported`, it is
//! never emulated.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use super::errors::MountError;
use super::value_objects::{Capability, StreamCapabilities};

/// Stream produced by an unseal.
pub trait SectorStream: Read + Send {
    /// Capabilities this stream really has.
    fn capabilities(&self) -> StreamCapabilities;

    /// Reposition the cursor.
    fn seek_to(&mut self, _pos: SeekFrom) -> Result<u64, MountError> {
        Err(MountError::Unsupported(Capability::Seek))
    }

    /// Read at an absolute offset without moving the cursor.
    fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize, MountError> {
        Err(MountError::Unsupported(Capability::ReadAt))
    }
}

/// Sequential-only stream.
pub struct PlainStream<R> {
    inner: R,
}

impl<R: Read + Send> PlainStream<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> Read for PlainStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> SectorStream for PlainStream<R> {
    fn capabilities(&self) -> StreamCapabilities {
        StreamCapabilities::READ_ONLY
    }
}

/// Stream over a seekable source; supports every capability.
pub struct SeekableStream<R> {
    inner: R,
}

impl<R: Read + Seek + Send> SeekableStream<R> {
    /// Wrap a seekable reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Seek + Send> Read for SeekableStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Seek + Send> SectorStream for SeekableStream<R> {
    fn capabilities(&self) -> StreamCapabilities {
        StreamCapabilities::FULL
    }

    fn seek_to(&mut self, pos: SeekFrom) -> Result<u64, MountError> {
        Ok(self.inner.seek(pos)?)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, MountError> {
        let cursor = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        let result = loop {
            if filled == buf.len() {
                break Ok(filled);
            }
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break Ok(filled),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(MountError::from(e)),
            }
        };

        // Cursor is restored even when the read failed.
        self.inner.seek(SeekFrom::Start(cursor))?;
        result
    }
}

/// Reader handed to the shard index when a mount is fetched.
pub struct MountReader {
    stream: Box<dyn SectorStream>,
}

impl MountReader {
    /// Wrap an unsealed stream.
    pub fn new(stream: Box<dyn SectorStream>) -> Self {
        Self { stream }
    }

    /// Capabilities of the underlying stream.
    pub fn capabilities(&self) -> StreamCapabilities {
        self.stream.capabilities()
    }

    /// Seek, reporting a missing capability as `MountError::Unsupported`.
    pub fn try_seek(&mut self, pos: SeekFrom) -> Result<u64, MountError> {
        self.require(Capability::Seek)?;
        self.stream.seek_to(pos)
    }

    /// Positional read, reporting a missing capability as
    /// `MountError::Unsupported`.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, MountError> {
        self.require(Capability::ReadAt)?;
        self.stream.read_at(buf, offset)
    }

    fn require(&self, capability: Capability) -> Result<(), MountError> {
        if self.capabilities().supports(capability) {
            Ok(())
        } else {
            Err(MountError::Unsupported(capability))
        }
    }
}

impl Read for MountReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Seek for MountReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek_to(pos).map_err(into_io_error)
    }
}

impl fmt::Debug for MountReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountReader")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

fn into_io_error(err: MountError) -> io::Error {
    match err {
        MountError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
        other => io::Error::other(other),
    }
}
