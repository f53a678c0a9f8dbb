use core::sync::atomic::{compiler_fence, Ordering};

use linring_map::{AliasedRegion, InitOptions, MapError, Mapper};

use crate::cursor::{Atomic, Cursor, Plain, SizeCounter};

/// A byte ring buffer whose contents, and whose free space, are always one contiguous slice.
///
/// The storage is an [`AliasedRegion`]: its pages are mapped twice, back to back. Data that
/// logically wraps around the end of the buffer continues seamlessly into the mirror.
///
/// ```text
///          (head)  <-- size -->   (tail)
///           v                      v
///     /----------------------------------|--------------------------------\
///     |  buffer                          |  mirror of the buffer          |
///     \----------------------------------|--------------------------------/
///
///     --->(tail)              (head) ----~~~~>
///          v                   v
///     /----------------------------------|--------------------------------\
///     |  buffer                          |  mirror of the buffer          |
///     \----------------------------------|--------------------------------/
/// ```
///
/// The intended use is to hand the two slabs `(write_head(), free_size())` and
/// `(read_head(), size())` to byte-oriented I/O and then advance with [`commit`] or [`consume`].
///
/// The size counter `S` decides about concurrent use. With [`Atomic`], [`RingBuffer::split`]
/// gives one producer and one consumer that may run on different threads. Multiple producers or
/// multiple consumers must serialize externally. With [`Plain`] the buffer stays on one thread.
///
/// [`commit`]: RingBuffer::commit
/// [`consume`]: RingBuffer::consume
pub struct RingBuffer<S: SizeCounter = Atomic> {
    region: AliasedRegion,
    cursor: Cursor<S>,
}

/// A ring buffer for use on a single thread, without atomic counter updates.
pub type LocalRingBuffer = RingBuffer<Plain>;

/// Size used by callers that do not care. 640KiB should be enough for everyone.
pub const DEFAULT_MIN_SIZE: usize = 640 * 1024;

/// The buffered bytes, in order.
pub type Bytes<'lt> = core::iter::Copied<core::slice::Iter<'lt, u8>>;

impl<S: SizeCounter> RingBuffer<S> {
    /// Try to allocate a buffer of at least `minsize` bytes, once.
    ///
    /// Fails with [`ErrorKind::Contention`](crate::ErrorKind::Contention) when another thread
    /// raced for the address space. Callers that allocate before spawning threads may retry.
    pub fn initialize(mapper: &Mapper, minsize: usize) -> Result<Self, MapError> {
        AliasedRegion::initialize(mapper, minsize).map(Self::from_region)
    }

    /// Allocate with the platform backend, retrying contention per `options`.
    pub fn with_options(minsize: usize, options: &InitOptions) -> Result<Self, MapError> {
        let mapper = Mapper::system().ok_or_else(MapError::unsupported)?;
        AliasedRegion::initialize_retrying(&mapper, minsize, options).map(Self::from_region)
    }

    /// Allocate a buffer of at least `minsize` bytes with the default options.
    pub fn new(minsize: usize) -> Result<Self, MapError> {
        Self::with_options(minsize, &InitOptions::default())
    }

    /// Like [`RingBuffer::new`], for callers that treat a failed allocation as fatal.
    ///
    /// # Panics
    ///
    /// With the error message and OS error number, if the buffer can not be allocated.
    #[track_caller]
    pub fn new_or_abort(minsize: usize) -> Self {
        match Self::new(minsize) {
            Ok(buffer) => buffer,
            Err(err) => panic!("failed to allocate a ring buffer of {minsize} bytes: {err}"),
        }
    }

    /// Use a mirrored region as storage, starting out empty.
    pub fn from_region(region: AliasedRegion) -> Self {
        RingBuffer {
            region,
            cursor: Cursor::default(),
        }
    }

    /// Mark `n` bytes at the write head as written.
    ///
    /// `n` must not exceed [`Self::free_size`]. Debug builds panic otherwise, release builds
    /// commit only the free space.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        let free = self.free_size();
        debug_assert!(n <= free, "commit of {n} bytes exceeds free space");
        // Writes through the mirror and reads through the buffer name the same bytes.
        compiler_fence(Ordering::SeqCst);
        self.cursor.commit(n.min(free), self.capacity());
    }

    /// Release `n` bytes at the read head.
    ///
    /// `n` must not exceed [`Self::size`]. Debug builds panic otherwise, release builds
    /// consume only the buffered bytes.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        let size = self.size();
        debug_assert!(n <= size, "consume of {n} bytes exceeds buffered data");
        compiler_fence(Ordering::SeqCst);
        self.cursor.consume(n.min(size), self.capacity());
    }

    /// Start of the [`Self::size`] buffered bytes.
    #[inline]
    pub fn read_head(&self) -> *const u8 {
        self.region.as_ptr().wrapping_add(self.cursor.head)
    }

    /// Start of the [`Self::free_size`] writable bytes.
    #[inline]
    pub fn write_head(&mut self) -> *mut u8 {
        self.region.as_ptr().wrapping_add(self.cursor.tail)
    }

    /// Drop all contents. The memory is left as is.
    pub fn clear(&mut self) {
        self.cursor.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.cursor.size(self.capacity())
    }

    /// Total size in bytes, a multiple of the page size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Number of bytes that can be committed.
    #[inline]
    pub fn free_size(&self) -> usize {
        self.capacity() - self.size()
    }

    /// The buffered bytes.
    pub fn readable(&self) -> &[u8] {
        // Safety: `head < capacity` and `size <= capacity`, in bounds of the doubled mapping.
        unsafe { core::slice::from_raw_parts(self.read_head(), self.size()) }
    }

    /// The free space, to be filled and then committed.
    pub fn writable(&mut self) -> &mut [u8] {
        let free = self.free_size();
        // Safety: `tail < capacity` and `free <= capacity`. The free space does not overlap the
        // buffered bytes in either half, which are only reachable through `&self` anyways.
        unsafe { core::slice::from_raw_parts_mut(self.write_head(), free) }
    }

    /// Iterate a snapshot of the buffered bytes.
    pub fn iter(&self) -> Bytes<'_> {
        self.readable().iter().copied()
    }

    /// Copy as much of `data` as fits and commit it. Returns the number of bytes taken.
    pub fn write_from(&mut self, data: &[u8]) -> usize {
        let slab = self.writable();
        let n = slab.len().min(data.len());
        slab[..n].copy_from_slice(&data[..n]);
        self.commit(n);
        n
    }

    /// Copy as many buffered bytes as fit into `out` and consume them.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let slab = self.readable();
        let n = slab.len().min(out.len());
        out[..n].copy_from_slice(&slab[..n]);
        self.consume(n);
        n
    }

    /// The underlying mirrored mapping.
    pub fn region(&self) -> &AliasedRegion {
        &self.region
    }

    pub(crate) fn split_parts(&mut self) -> (*mut u8, usize, &mut Cursor<S>) {
        let base = self.region.as_ptr();
        let capacity = self.region.len();
        (base, capacity, &mut self.cursor)
    }
}

impl<'lt, S: SizeCounter> IntoIterator for &'lt RingBuffer<S> {
    type Item = u8;
    type IntoIter = Bytes<'lt>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<S: SizeCounter> core::fmt::Debug for RingBuffer<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.cursor.head)
            .field("tail", &self.cursor.tail)
            .field("size", &self.size())
            .finish()
    }
}
