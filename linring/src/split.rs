//! One producer and one consumer over the same ring.
use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, Ordering};

use crate::cursor::{advance, Atomic, SizeCounter};
use crate::RingBuffer;

/// The writing half of a split [`RingBuffer`].
///
/// Owns the tail. It may run on another thread than its [`Consumer`].
pub struct Producer<'lt> {
    base: *mut u8,
    capacity: usize,
    tail: &'lt mut usize,
    size: &'lt Atomic,
}

/// The reading half of a split [`RingBuffer`].
///
/// Owns the head. It may run on another thread than its [`Producer`].
pub struct Consumer<'lt> {
    base: *const u8,
    capacity: usize,
    head: &'lt mut usize,
    size: &'lt Atomic,
    /// The bytes handed out are borrowed from the ring.
    _bytes: PhantomData<&'lt [u8]>,
}

impl RingBuffer<Atomic> {
    /// Split into a producer and a consumer that may be used concurrently.
    ///
    /// The count of buffered bytes is the only state they share. The producer publishes it after
    /// writing, the consumer observes it before reading and publishes its decrease after reading,
    /// so neither touches bytes the other one still owns.
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        let (base, capacity, cursor) = self.split_parts();
        let size = &cursor.size;

        let producer = Producer {
            base,
            capacity,
            tail: &mut cursor.tail,
            size,
        };

        let consumer = Consumer {
            base,
            capacity,
            head: &mut cursor.head,
            size,
            _bytes: PhantomData,
        };

        (producer, consumer)
    }
}

impl Producer<'_> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes that can currently be committed.
    ///
    /// This only grows until the next commit, as the consumer releases space.
    pub fn free_size(&self) -> usize {
        self.capacity - self.size.load().min(self.capacity)
    }

    pub fn write_head(&mut self) -> *mut u8 {
        self.base.wrapping_add(*self.tail)
    }

    /// The currently free space.
    pub fn writable(&mut self) -> &mut [u8] {
        let free = self.free_size();
        // Safety: the consumer released these bytes with its decrease of the count, which we
        // acquired. It does not read them again before we commit.
        unsafe { core::slice::from_raw_parts_mut(self.write_head(), free) }
    }

    /// Publish `n` written bytes to the consumer.
    pub fn commit(&mut self, n: usize) {
        let free = self.free_size();
        debug_assert!(n <= free, "commit of {n} bytes exceeds free space");
        // Clamped, the consumer may hold a slab of anything beyond.
        let n = n.min(free);
        compiler_fence(Ordering::SeqCst);
        advance(self.tail, n, self.capacity);
        self.size.increase(n);
    }

    /// Copy as much of `data` as fits and commit it.
    pub fn write_from(&mut self, data: &[u8]) -> usize {
        let slab = self.writable();
        let n = slab.len().min(data.len());
        slab[..n].copy_from_slice(&data[..n]);
        self.commit(n);
        n
    }
}

impl Consumer<'_> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes that can currently be consumed.
    ///
    /// This only grows until the next consume, as the producer commits.
    pub fn size(&self) -> usize {
        self.size.load().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn read_head(&self) -> *const u8 {
        self.base.wrapping_add(*self.head)
    }

    /// The currently buffered bytes.
    pub fn readable(&self) -> &[u8] {
        let size = self.size();
        // Safety: the producer published these bytes with its increase of the count, which we
        // acquired. It does not write them again before we consume.
        unsafe { core::slice::from_raw_parts(self.read_head(), size) }
    }

    /// Release `n` read bytes to the producer.
    pub fn consume(&mut self, n: usize) {
        let size = self.size();
        debug_assert!(n <= size, "consume of {n} bytes exceeds buffered data");
        // Clamped, the producer may hold a slab of anything beyond.
        let n = n.min(size);
        compiler_fence(Ordering::SeqCst);
        advance(self.head, n, self.capacity);
        self.size.decrease(n);
    }

    /// Copy as many buffered bytes as fit into `out` and consume them.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let slab = self.readable();
        let n = slab.len().min(out.len());
        out[..n].copy_from_slice(&slab[..n]);
        self.consume(n);
        n
    }
}

// Safety: each half exclusively owns its offset and the bytes on its side of the count. The
// count itself is atomic.
unsafe impl Send for Producer<'_> {}
unsafe impl Send for Consumer<'_> {}

impl core::fmt::Debug for Producer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("tail", &*self.tail)
            .field("free_size", &self.free_size())
            .finish()
    }
}

impl core::fmt::Debug for Consumer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Consumer")
            .field("head", &*self.head)
            .field("size", &self.size())
            .finish()
    }
}
