//! Head, tail, and the number of bytes between them.
use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// Representation of the buffered byte count.
///
/// The count is the only value shared between a producer and a consumer. The producer publishes
/// an increase after writing the bytes, the consumer observes the count before reading and
/// publishes the decrease after it has finished reading.
pub trait SizeCounter: sealed::Sealed + Default {
    /// Observe the count. All bytes committed before the observed value are visible.
    fn load(&self) -> usize;
    /// Publish `n` more buffered bytes.
    fn increase(&self, n: usize);
    /// Publish `n` fewer buffered bytes, releasing their space.
    fn decrease(&self, n: usize);
    fn reset(&self);
}

/// A count for buffers used from one thread only.
#[derive(Debug, Default)]
pub struct Plain(Cell<usize>);

/// A count that a producer and a consumer thread can share.
#[derive(Debug, Default)]
pub struct Atomic(AtomicUsize);

/// The logical contents of a ring of `capacity` bytes.
///
/// Both offsets stay below the capacity. Callers clamp each advance to what is available, so
/// `tail - head` equals the count modulo the capacity.
#[derive(Debug, Default)]
pub(crate) struct Cursor<S> {
    pub(crate) head: usize,
    pub(crate) tail: usize,
    pub(crate) size: S,
}

impl<S: SizeCounter> Cursor<S> {
    pub(crate) fn size(&self, capacity: usize) -> usize {
        self.size.load().min(capacity)
    }

    pub(crate) fn commit(&mut self, n: usize, capacity: usize) {
        advance(&mut self.tail, n, capacity);
        self.size.increase(n);
    }

    pub(crate) fn consume(&mut self, n: usize, capacity: usize) {
        advance(&mut self.head, n, capacity);
        self.size.decrease(n);
    }

    pub(crate) fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.size.reset();
    }
}

/// Move an offset forward by `n`, modulo `capacity`.
pub(crate) fn advance(offset: &mut usize, n: usize, capacity: usize) {
    // Both terms are below the capacity, which is at most half the address space.
    *offset = (*offset + n % capacity) % capacity;
}

impl sealed::Sealed for Plain {}
impl sealed::Sealed for Atomic {}

impl SizeCounter for Plain {
    fn load(&self) -> usize {
        self.0.get()
    }

    fn increase(&self, n: usize) {
        self.0.set(self.0.get().wrapping_add(n));
    }

    fn decrease(&self, n: usize) {
        self.0.set(self.0.get().wrapping_sub(n));
    }

    fn reset(&self) {
        self.0.set(0);
    }
}

impl SizeCounter for Atomic {
    fn load(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn increase(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Release);
    }

    fn decrease(&self, n: usize) {
        self.0.fetch_sub(n, Ordering::Release);
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[test]
fn cursor_wraps() {
    let mut cursor = Cursor::<Plain>::default();

    cursor.commit(3000, 4096);
    cursor.consume(3000, 4096);
    cursor.commit(2000, 4096);
    assert_eq!((cursor.head, cursor.tail), (3000, 904));
    assert_eq!(cursor.size(4096), 2000);

    cursor.consume(2000, 4096);
    assert_eq!((cursor.head, cursor.tail), (904, 904));
    assert_eq!(cursor.size(4096), 0);

    cursor.commit(4096, 4096);
    assert_eq!(cursor.tail, 904);
    assert_eq!(cursor.size(4096), 4096);

    cursor.clear();
    assert_eq!((cursor.head, cursor.tail, cursor.size(4096)), (0, 0, 0));
}

#[test]
fn counters_agree() {
    fn run<S: SizeCounter>() -> usize {
        let counter = S::default();
        counter.increase(10);
        counter.decrease(4);
        counter.increase(1);
        counter.load()
    }

    assert_eq!(run::<Plain>(), 7);
    assert_eq!(run::<Atomic>(), 7);
}
