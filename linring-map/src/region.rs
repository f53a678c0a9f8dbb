//! The mirrored pair of mappings.
use core::ffi::c_void;
use core::ptr::NonNull;

use crate::{MapError, Mapper};

/// Two mappings of the same pages, placed directly after each other.
///
/// A write to offset `k` of the first half is visible at offset `k` of the second half and vice
/// versa. Any run of at most `len()` bytes starting in the first half is thus contiguous in the
/// address space, even when it logically wraps around the end of the pages.
///
/// ```text
///     base                        base + len                  base + 2 * len
///     |---------------------------|---------------------------|
///     | pages                     | the same pages, again     |
/// ```
pub struct AliasedRegion {
    base: NonNull<u8>,
    len: usize,
    mapper: Mapper,
}

/// Parameters of the convenience initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitOptions {
    /// Total number of attempts when the mirror's address range was taken by another thread.
    ///
    /// Values below one are treated as one.
    pub attempts: u32,
}

/// Mappings created by an initialization that has not yet succeeded.
///
/// Everything recorded here is unmapped on drop, which includes unwinding out of the sanity check.
struct Fragments<'lt> {
    mapper: &'lt Mapper,
    base: *mut c_void,
    base_len: usize,
    alias: *mut c_void,
    alias_len: usize,
}

impl AliasedRegion {
    /// Create a new mirrored region of at least `minsize` bytes.
    ///
    /// The size is rounded up to a multiple of the page size. The steps are:
    ///
    /// 1. Map twice the rounded size, shared and anonymous.
    /// 2. Shrink that mapping to the rounded size.
    /// 3. Map the same pages a second time, into the just released upper half.
    /// 4. Check that both halves are really the same memory.
    ///
    /// Another thread may map into the upper half between steps 2 and 3. This fails with
    /// [`ErrorKind::Contention`](crate::ErrorKind::Contention) and may be retried, preferably
    /// before spawning concurrent threads in the first place. Nothing stays mapped after a
    /// failure.
    ///
    /// # Panics
    ///
    /// When the second mapping does not show the contents of the first. The backend violated its
    /// contract, nothing built on the region could be correct.
    pub fn initialize(mapper: &Mapper, minsize: usize) -> Result<Self, MapError> {
        let bytes = Self::layout_for(mapper, minsize)?;
        // Checked in the layout.
        let total = bytes * 2;

        let mut fragments = Fragments {
            mapper,
            base: core::ptr::null_mut(),
            base_len: 0,
            alias: core::ptr::null_mut(),
            alias_len: 0,
        };

        let addr = (mapper.map_shared)(total);
        if addr == mapper.map_failed {
            let err = mapper.last_error();
            tracing::debug!(total, errno = err.errno(), "mapping failed");
            return Err(err);
        }

        fragments.base = addr;
        fragments.base_len = total;
        tracing::trace!(?addr, total, "mapped both halves");

        let addr = (mapper.shrink)(addr, total, bytes);
        if addr == mapper.map_failed {
            let err = mapper.last_error();
            tracing::debug!(bytes, errno = err.errno(), "shrinking failed");
            return Err(err);
        }

        fragments.base = addr;
        fragments.base_len = bytes;

        let at = addr.cast::<u8>().wrapping_add(bytes).cast::<c_void>();
        let alias = (mapper.alias)(addr, bytes, at);
        if alias == mapper.map_failed {
            let err = mapper.alias_error();
            tracing::debug!(?at, errno = err.errno(), kind = %err.kind(), "mirroring failed");
            return Err(err);
        }

        fragments.alias = alias;
        fragments.alias_len = bytes;

        if alias != at {
            tracing::debug!(?at, ?alias, "mirror placed elsewhere");
            return Err(mapper.contention());
        }

        // Safety: both pointers are at the start of a live mapping of `bytes > 0` bytes.
        unsafe { Self::check_coherent(addr.cast(), alias.cast()) };

        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| mapper.last_error())?;
        fragments.disarm();
        tracing::trace!(?base, len = bytes, "mirrored region ready");

        Ok(AliasedRegion {
            base,
            len: bytes,
            mapper: mapper.clone(),
        })
    }

    /// Like [`Self::initialize`], but retry a lost race for the address range.
    pub fn initialize_retrying(
        mapper: &Mapper,
        minsize: usize,
        options: &InitOptions,
    ) -> Result<Self, MapError> {
        let attempts = options.attempts.max(1);
        let mut attempt = 1;

        loop {
            match Self::initialize(mapper, minsize) {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::debug!(attempt, attempts, "address range taken, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(attempt, minsize, %err, "failed to create mirrored region");
                    return Err(err);
                }
                Ok(region) => return Ok(region),
            }
        }
    }

    /// Length of one half. A nonzero multiple of the page size.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Total length of address space held, both halves.
    pub fn mapped_len(&self) -> usize {
        2 * self.len
    }

    /// Start of the first half.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn layout_for(mapper: &Mapper, minsize: usize) -> Result<usize, MapError> {
        if minsize == 0 {
            return Err(mapper.invalid());
        }

        let page = mapper.page_size();
        let bytes = if page == 0 {
            None
        } else {
            minsize.checked_next_multiple_of(page)
        };

        bytes
            .filter(|bytes| bytes.checked_mul(2).is_some())
            .ok_or_else(|| mapper.invalid())
    }

    /// Safety: `first` and `second` are each valid for reads and writes of one byte.
    unsafe fn check_coherent(first: *mut u8, second: *mut u8) {
        // Volatile, we are asking whether two distinct addresses name the same byte.
        first.write_volatile(b'x');
        assert_eq!(
            second.read_volatile(),
            b'x',
            "the second half does not mirror the first"
        );

        second.write_volatile(b'y');
        assert_eq!(
            first.read_volatile(),
            b'y',
            "the first half does not mirror the second"
        );

        first.write_volatile(0);
    }
}

impl Fragments<'_> {
    fn disarm(&mut self) {
        self.base = core::ptr::null_mut();
        self.alias = core::ptr::null_mut();
    }
}

impl Drop for Fragments<'_> {
    fn drop(&mut self) {
        if !self.base.is_null() {
            (self.mapper.munmap)(self.base, self.base_len);
        }

        if !self.alias.is_null() {
            (self.mapper.munmap)(self.alias, self.alias_len);
        }
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions { attempts: 8 }
    }
}

impl core::fmt::Debug for AliasedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AliasedRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for AliasedRegion {
    fn drop(&mut self) {
        let base = self.base.as_ptr();
        let mirror = base.wrapping_add(self.len);
        // Safety: no more references to either half, they are borrowed from `self` only.
        (self.mapper.munmap)(base.cast(), self.len);
        (self.mapper.munmap)(mirror.cast(), self.len);
        tracing::trace!(?base, len = self.len, "unmapped mirrored region");
    }
}

// Safety: the region is an exclusively owned allocation, like a `Box<[u8]>`. Accesses to its
// bytes are governed by whoever holds it.
unsafe impl Send for AliasedRegion {}
unsafe impl Sync for AliasedRegion {}
