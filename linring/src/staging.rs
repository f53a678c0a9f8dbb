//! Choosing between the mirrored ring and the flat buffer by configuration.
use std::io::{self, Read, Write};

use linring_map::{ErrorKind, InitOptions, MapError};
use thiserror::Error;

use crate::{IoBuffer, LocalRingBuffer, DEFAULT_MIN_SIZE};

/// Which buffer to stage bytes in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// The mirrored ring buffer. Fails where the platform has no backend for it.
    Linear,
    /// The compacting flat buffer. Works everywhere.
    Flat,
    /// The ring buffer where it can be allocated, the flat buffer otherwise.
    #[default]
    Auto,
}

#[derive(Clone, Debug)]
pub struct StagingOptions {
    pub kind: BufferKind,
    /// Lower bound of the buffer size. The ring buffer rounds it up to whole pages.
    pub min_size: usize,
    pub init: InitOptions,
}

/// A single-threaded staging buffer of a configured kind.
#[derive(Debug)]
pub enum Staging {
    Linear(LocalRingBuffer),
    Flat(IoBuffer),
}

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to allocate ring buffer: {0}")]
    Map(#[from] MapError),
    #[error("failed to allocate flat buffer: {0}")]
    Flat(#[from] io::Error),
}

impl Staging {
    pub fn new(options: &StagingOptions) -> Result<Self, StagingError> {
        let min_size = options.min_size;

        match options.kind {
            BufferKind::Linear => {
                let ring = LocalRingBuffer::with_options(min_size, &options.init)?;
                Ok(Staging::Linear(ring))
            }
            BufferKind::Flat => Ok(Staging::Flat(IoBuffer::new(min_size)?)),
            BufferKind::Auto => match LocalRingBuffer::with_options(min_size, &options.init) {
                Ok(ring) => Ok(Staging::Linear(ring)),
                Err(err) if err.kind() == ErrorKind::InvalidArgument => Err(err.into()),
                Err(err) => {
                    tracing::warn!(%err, min_size, "falling back to a flat buffer");
                    Ok(Staging::Flat(IoBuffer::new(min_size)?))
                }
            },
        }
    }

    /// The kind that was allocated, never [`BufferKind::Auto`].
    pub fn kind(&self) -> BufferKind {
        match self {
            Staging::Linear(_) => BufferKind::Linear,
            Staging::Flat(_) => BufferKind::Flat,
        }
    }

    /// A writable slab of up to `n` bytes.
    pub fn prepare(&mut self, n: usize) -> &mut [u8] {
        match self {
            Staging::Linear(ring) => {
                let slab = ring.writable();
                let n = n.min(slab.len());
                &mut slab[..n]
            }
            Staging::Flat(flat) => flat.prepare(n),
        }
    }

    pub fn commit(&mut self, n: usize) {
        match self {
            Staging::Linear(ring) => ring.commit(n),
            Staging::Flat(flat) => flat.commit(n),
        }
    }

    pub fn readable(&self) -> &[u8] {
        match self {
            Staging::Linear(ring) => ring.readable(),
            Staging::Flat(flat) => flat.readable(),
        }
    }

    pub fn consume(&mut self, n: usize) {
        match self {
            Staging::Linear(ring) => ring.consume(n),
            Staging::Flat(flat) => flat.consume(n),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Staging::Linear(ring) => ring.clear(),
            Staging::Flat(flat) => flat.clear(),
        }
    }

    pub fn size(&self) -> usize {
        self.readable().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Upper bound of bytes a single `prepare` can return right now.
    pub fn capacity(&self) -> usize {
        match self {
            Staging::Linear(ring) => ring.free_size(),
            Staging::Flat(flat) => flat.capacity(),
        }
    }

    /// Prepare up to `block` bytes, issue a single `read` into them and commit what arrived.
    pub fn fill_from(&mut self, mut reader: impl Read, block: usize) -> io::Result<usize> {
        let n = reader.read(self.prepare(block))?;
        self.commit(n);
        Ok(n)
    }

    /// Issue a single `write` of the buffered bytes and consume what was taken.
    pub fn drain_into(&mut self, mut writer: impl Write) -> io::Result<usize> {
        let n = writer.write(self.readable())?;
        self.consume(n);
        Ok(n)
    }
}

impl Default for StagingOptions {
    fn default() -> Self {
        StagingOptions {
            kind: BufferKind::Auto,
            min_size: DEFAULT_MIN_SIZE,
            init: InitOptions::default(),
        }
    }
}
