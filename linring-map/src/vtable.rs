use alloc::sync::Arc;
use core::ffi::{c_int, c_void};

use crate::{ErrorKind, MapError};

/// A table of OS functions.
///
/// This enumerates the functions required to place a mirrored pair of mappings. A table must
/// contain functions that behave like the correspondingly named steps of the protocol in
/// [`AliasedRegion::initialize`](crate::AliasedRegion::initialize), see the Safety precondition
/// of [`Mapper::new_unchecked`]. A default table can be initialized when linking against `libc`
/// on Linux.
#[non_exhaustive]
pub struct VTable {
    /// The granularity of all mappings.
    pub page_size: fn() -> usize,
    /// Map `len` bytes of anonymous, shared, read-write memory anywhere.
    pub map_shared: fn(len: usize) -> *mut c_void,
    /// Shrink the mapping at `addr` from `old_len` to `new_len` bytes, in place.
    pub shrink: fn(addr: *mut c_void, old_len: usize, new_len: usize) -> *mut c_void,
    /// Map the `len` bytes of pages at `addr` a second time, at `at` or nowhere.
    pub alias: fn(addr: *mut c_void, len: usize, at: *mut c_void) -> *mut c_void,
    pub munmap: fn(*mut c_void, usize) -> c_int,
    pub errno: fn() -> c_int,

    pub map_failed: *mut c_void,
    /// The errno of `alias` when its target range is occupied. Any other errno is a failure to
    /// map, not a lost race.
    pub contended: c_int,
    pub einval: c_int,
}

// Safety: only function pointers and a sentinel address that is never dereferenced.
unsafe impl Send for VTable {}
unsafe impl Sync for VTable {}

/// Shared handle to the mapping backend.
#[derive(Clone)]
pub struct Mapper {
    inner: Arc<Inner>,
}

struct Inner {
    vtable: VTable,
}

impl Mapper {
    /// Create a `Mapper` from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain functions that implement the `mmap` interface: memory returned by
    /// `map_shared` and `alias` stays valid until passed to `munmap`, and a successful `alias` is
    /// backed by the very same pages as its source.
    pub unsafe fn new_unchecked(vtable: VTable) -> Self {
        Mapper {
            inner: Arc::new(Inner { vtable }),
        }
    }

    #[cfg(all(feature = "libc", target_os = "linux"))]
    pub fn new() -> Self {
        // Safety: the libc table implements the contract, see `VTable::new_libc`.
        unsafe { Self::new_unchecked(VTable::new_libc()) }
    }

    /// The backend of the current platform, if there is one.
    pub fn system() -> Option<Self> {
        #[cfg(all(feature = "libc", target_os = "linux"))]
        {
            Some(Self::new())
        }

        #[cfg(not(all(feature = "libc", target_os = "linux")))]
        {
            None
        }
    }

    pub fn page_size(&self) -> usize {
        (self.inner.vtable.page_size)()
    }

    /// The error after a failed `map_shared` or `shrink`.
    pub(crate) fn last_error(&self) -> MapError {
        MapError::new(ErrorKind::OutOfMemory, (self.inner.vtable.errno)())
    }

    /// The error after a failed `alias`, which may have lost the race for its range.
    pub(crate) fn alias_error(&self) -> MapError {
        let errno = (self.inner.vtable.errno)();

        if errno == self.inner.vtable.contended {
            MapError::new(ErrorKind::Contention, errno)
        } else {
            MapError::new(ErrorKind::OutOfMemory, errno)
        }
    }

    pub(crate) fn invalid(&self) -> MapError {
        MapError::new(ErrorKind::InvalidArgument, self.inner.vtable.einval)
    }

    pub(crate) fn contention(&self) -> MapError {
        MapError::new(ErrorKind::Contention, self.inner.vtable.contended)
    }
}

impl core::ops::Deref for Mapper {
    type Target = VTable;

    fn deref(&self) -> &Self::Target {
        &self.inner.vtable
    }
}

impl core::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapper")
            .field("page_size", &self.page_size())
            .finish()
    }
}

impl VTable {
    #[cfg(all(feature = "libc", target_os = "linux"))]
    pub fn new_libc() -> Self {
        fn _page_size() -> usize {
            // Safety: no preconditions.
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            // A failure yields zero, which the protocol rejects as an invalid layout.
            usize::try_from(size).unwrap_or(0)
        }

        fn _map_shared(len: usize) -> *mut c_void {
            unsafe {
                libc::mmap(
                    core::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            }
        }

        fn _shrink(addr: *mut c_void, old_len: usize, new_len: usize) -> *mut c_void {
            // Without `MREMAP_MAYMOVE` shrinking never relocates.
            unsafe { libc::mremap(addr, old_len, new_len, 0) }
        }

        fn _alias(addr: *mut c_void, len: usize, at: *mut c_void) -> *mut c_void {
            // Claim the target range first. This never replaces a mapping some other thread put
            // there in the meantime, instead it fails with `EEXIST`.
            let placeholder = unsafe {
                libc::mmap(
                    at,
                    len,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE
                        | libc::MAP_ANONYMOUS
                        | libc::MAP_NORESERVE
                        | libc::MAP_FIXED_NOREPLACE,
                    -1,
                    0,
                )
            };

            if placeholder == libc::MAP_FAILED {
                return libc::MAP_FAILED;
            }

            if placeholder != at {
                // Kernels before 4.17 treat the flag as a mere hint.
                unsafe {
                    libc::munmap(placeholder, len);
                    *libc::__errno_location() = libc::EEXIST;
                }

                return libc::MAP_FAILED;
            }

            // The placeholder is ours, so the fixed move only ever replaces our own pages. An old
            // length of zero duplicates a shared mapping instead of moving it.
            let alias = unsafe {
                libc::mremap(addr, 0, len, libc::MREMAP_MAYMOVE | libc::MREMAP_FIXED, at)
            };

            if alias == libc::MAP_FAILED {
                unsafe {
                    let errno = *libc::__errno_location();
                    libc::munmap(placeholder, len);
                    *libc::__errno_location() = errno;
                }
            }

            alias
        }

        fn _munmap(addr: *mut c_void, len: usize) -> c_int {
            unsafe { libc::munmap(addr, len) }
        }

        fn _errno() -> c_int {
            unsafe { *libc::__errno_location() }
        }

        VTable {
            page_size: _page_size,
            map_shared: _map_shared,
            shrink: _shrink,
            alias: _alias,
            munmap: _munmap,
            errno: _errno,
            map_failed: libc::MAP_FAILED,
            contended: libc::EEXIST,
            einval: libc::EINVAL,
        }
    }
}
