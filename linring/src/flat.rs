use std::io::{self, Read, Write};

use memmap2::MmapMut;

/// A buffer that keeps its contents contiguous by moving them, not by mirroring memory.
///
/// When a write is prepared that does not fit behind the tail, the unread bytes are moved to the
/// start of the storage first. This trades the setup and platform requirements of
/// [`RingBuffer`](crate::RingBuffer) for an occasional copy of the buffered bytes.
///
/// ```text
///     0        head         tail              len
///     |--------|############|-----------------|
///               <-- size --> <- free_size() -->
///      <-------- capacity() ------->  (after moving the data to 0)
/// ```
///
/// Writing goes through [`prepare`](IoBuffer::prepare) and [`commit`](IoBuffer::commit):
///
/// ```
/// # fn main() -> std::io::Result<()> {
/// let mut buffer = linring::IoBuffer::new(512)?;
/// let slab = buffer.prepare(5);
/// slab.copy_from_slice(b"hello");
/// buffer.commit(5);
/// assert_eq!(buffer.readable(), b"hello");
/// # Ok(()) }
/// ```
///
/// No concurrent use.
pub struct IoBuffer {
    storage: MmapMut,
    head: usize,
    tail: usize,
}

impl IoBuffer {
    /// Allocate `len` bytes of anonymous memory.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "flat buffer of zero length",
            ));
        }

        let storage = MmapMut::map_anon(len)?;

        Ok(IoBuffer {
            storage,
            head: 0,
            tail: 0,
        })
    }

    /// A writable slab of up to `n` bytes at the write head.
    ///
    /// The slab is shorter than requested if the buffer can not hold `n` more bytes even after
    /// moving its contents to the front.
    pub fn prepare(&mut self, n: usize) -> &mut [u8] {
        if n > self.free_size() {
            self.compact();
        }

        let n = n.min(self.capacity());
        &mut self.storage[self.tail..self.tail + n]
    }

    /// Mark `n` prepared bytes as written.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.free_size(), "commit of {n} bytes exceeds free space");
        self.tail = self.tail.saturating_add(n).min(self.storage.len());
    }

    /// Release `n` bytes at the read head.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.size(), "consume of {n} bytes exceeds buffered data");
        self.head = self.head.saturating_add(n).min(self.tail);

        if self.head == self.tail {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    pub fn read_head(&self) -> *const u8 {
        self.readable().as_ptr()
    }

    pub fn write_head(&mut self) -> *mut u8 {
        self.storage[self.tail..].as_mut_ptr()
    }

    /// The buffered bytes.
    pub fn readable(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    /// Amount of buffered bytes.
    pub fn size(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Amount of bytes that can be committed without preparing.
    pub fn free_size(&self) -> usize {
        self.storage.len() - self.tail
    }

    /// Amount of bytes that can be prepared.
    pub fn capacity(&self) -> usize {
        self.storage.len() - self.size()
    }

    /// Length of the storage.
    pub fn len(&self) -> usize {
        self.storage.len()
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

    fn compact(&mut self) {
        if self.head == 0 {
            return;
        }

        let moved = self.size();
        self.storage.copy_within(self.head..self.tail, 0);
        self.head = 0;
        self.tail = moved;
        tracing::trace!(moved, "compacted flat buffer");
    }
}

impl Read for IoBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let slab = self.readable();
        let n = slab.len().min(buf.len());
        buf[..n].copy_from_slice(&slab[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let slab = self.prepare(buf.len());
        let n = slab.len();
        slab.copy_from_slice(&buf[..n]);
        self.commit(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl core::fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoBuffer")
            .field("len", &self.storage.len())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}
