use crate::{AliasedRegion, ErrorKind, InitOptions, MapError, Mapper, VTable};
use core::ffi::{c_int, c_void};
use std::cell::{Cell, RefCell};
use std::vec::Vec;

const PAGE: usize = 0x1000;
const BASE: usize = 0x7f00_0000_0000;
const ELSEWHERE: usize = 0x7e00_0000_0000;
const FAILED: usize = usize::MAX;

const ENOMEM: c_int = 12;
const EAGAIN: c_int = 11;
const EEXIST: c_int = 17;
const EINVAL: c_int = 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    Map(usize),
    Shrink(usize, usize),
    Alias(usize),
    Unmap(usize, usize),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fail {
    Map,
    Shrink,
    Alias(c_int),
    AliasElsewhere,
}

std::thread_local! {
    static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
    static FAIL: Cell<Option<Fail>> = const { Cell::new(None) };
    static ERRNO: Cell<c_int> = const { Cell::new(0) };
}

fn record(call: Call) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

fn failing_at(fail: Fail) -> bool {
    FAIL.with(Cell::get) == Some(fail)
}

fn fake_failure(errno: c_int) -> *mut c_void {
    ERRNO.with(|e| e.set(errno));
    FAILED as *mut c_void
}

/// A backend that never touches memory. Only usable for initializations that fail.
fn with_fake(fail: Option<Fail>, method: impl FnOnce(Mapper)) -> Vec<Call> {
    fn _map_shared(len: usize) -> *mut c_void {
        record(Call::Map(len));
        if failing_at(Fail::Map) {
            return fake_failure(ENOMEM);
        }

        BASE as *mut c_void
    }

    fn _shrink(addr: *mut c_void, old_len: usize, new_len: usize) -> *mut c_void {
        record(Call::Shrink(old_len, new_len));
        if failing_at(Fail::Shrink) {
            return fake_failure(ENOMEM);
        }

        addr
    }

    fn _alias(_: *mut c_void, len: usize, at: *mut c_void) -> *mut c_void {
        record(Call::Alias(len));
        match FAIL.with(Cell::get) {
            Some(Fail::Alias(errno)) => fake_failure(errno),
            Some(Fail::AliasElsewhere) => ELSEWHERE as *mut c_void,
            _ => at,
        }
    }

    fn _munmap(addr: *mut c_void, len: usize) -> c_int {
        record(Call::Unmap(addr as usize, len));
        0
    }

    CALLS.with(|calls| calls.borrow_mut().clear());
    FAIL.with(|f| f.set(fail));

    let mapper = unsafe {
        Mapper::new_unchecked(VTable {
            page_size: || PAGE,
            map_shared: _map_shared,
            shrink: _shrink,
            alias: _alias,
            munmap: _munmap,
            errno: || ERRNO.with(Cell::get),
            map_failed: FAILED as *mut c_void,
            contended: EEXIST,
            einval: EINVAL,
        })
    };

    method(mapper);
    CALLS.with(|calls| calls.take())
}

fn initialize_err(mapper: &Mapper, minsize: usize) -> MapError {
    match AliasedRegion::initialize(mapper, minsize) {
        Ok(_) => panic!("the fake backend can not produce a region"),
        Err(err) => err,
    }
}

#[test]
fn rejects_empty() {
    let calls = with_fake(None, |mapper| {
        let err = initialize_err(&mapper, 0);
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.errno(), EINVAL);
    });

    assert!(calls.is_empty(), "{calls:?}");
}

#[test]
fn rejects_overflow() {
    let calls = with_fake(None, |mapper| {
        // Rounding up to the page overflows.
        let err = initialize_err(&mapper, usize::MAX);
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        // Rounding fits, doubling does not.
        let err = initialize_err(&mapper, usize::MAX / 2 + 1);
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    });

    assert!(calls.is_empty(), "{calls:?}");
}

#[test]
fn map_failure() {
    let calls = with_fake(Some(Fail::Map), |mapper| {
        let err = initialize_err(&mapper, 1);
        assert_eq!(err, MapError::new(ErrorKind::OutOfMemory, ENOMEM));
    });

    assert_eq!(calls, [Call::Map(2 * PAGE)]);
}

#[test]
fn shrink_failure_unmaps_both_halves() {
    let calls = with_fake(Some(Fail::Shrink), |mapper| {
        let err = initialize_err(&mapper, PAGE + 1);
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    });

    assert_eq!(
        calls,
        [
            Call::Map(4 * PAGE),
            Call::Shrink(4 * PAGE, 2 * PAGE),
            Call::Unmap(BASE, 4 * PAGE),
        ]
    );
}

#[test]
fn alias_failure_unmaps_first_half() {
    let calls = with_fake(Some(Fail::Alias(ENOMEM)), |mapper| {
        let err = initialize_err(&mapper, PAGE);
        assert_eq!(err, MapError::new(ErrorKind::OutOfMemory, ENOMEM));
        assert!(!err.is_retryable());
    });

    assert_eq!(
        calls,
        [
            Call::Map(2 * PAGE),
            Call::Shrink(2 * PAGE, PAGE),
            Call::Alias(PAGE),
            Call::Unmap(BASE, PAGE),
        ]
    );
}

#[test]
fn occupied_range_is_contention() {
    let calls = with_fake(Some(Fail::Alias(EEXIST)), |mapper| {
        let err = initialize_err(&mapper, PAGE);
        assert_eq!(err, MapError::new(ErrorKind::Contention, EEXIST));
        assert!(err.is_retryable());
    });

    assert_eq!(calls.last(), Some(&Call::Unmap(BASE, PAGE)));
}

#[test]
fn locked_memory_limit_is_not_contention() {
    let options = InitOptions { attempts: 3 };

    let calls = with_fake(Some(Fail::Alias(EAGAIN)), |mapper| {
        let err = AliasedRegion::initialize_retrying(&mapper, PAGE, &options).unwrap_err();
        assert_eq!(err, MapError::new(ErrorKind::OutOfMemory, EAGAIN));
        assert!(!err.is_retryable());
    });

    let attempts = calls.iter().filter(|c| matches!(c, Call::Map(_))).count();
    assert_eq!(attempts, 1);
    assert_eq!(calls.last(), Some(&Call::Unmap(BASE, PAGE)));
}

#[test]
fn misplaced_mirror_is_unmapped() {
    let calls = with_fake(Some(Fail::AliasElsewhere), |mapper| {
        let err = initialize_err(&mapper, PAGE);
        assert_eq!(err.kind(), ErrorKind::Contention);
    });

    assert_eq!(
        calls,
        [
            Call::Map(2 * PAGE),
            Call::Shrink(2 * PAGE, PAGE),
            Call::Alias(PAGE),
            Call::Unmap(BASE, PAGE),
            Call::Unmap(ELSEWHERE, PAGE),
        ]
    );
}

#[test]
fn retries_only_contention() {
    let options = InitOptions { attempts: 3 };

    let calls = with_fake(Some(Fail::AliasElsewhere), |mapper| {
        let err = AliasedRegion::initialize_retrying(&mapper, PAGE, &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contention);
    });

    let attempts = calls.iter().filter(|c| matches!(c, Call::Map(_))).count();
    assert_eq!(attempts, 3);

    let calls = with_fake(Some(Fail::Map), |mapper| {
        let err = AliasedRegion::initialize_retrying(&mapper, PAGE, &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    });

    assert_eq!(calls, [Call::Map(2 * PAGE)]);

    let calls = with_fake(Some(Fail::Map), |mapper| {
        let zero = InitOptions { attempts: 0 };
        AliasedRegion::initialize_retrying(&mapper, PAGE, &zero).unwrap_err();
    });

    assert_eq!(calls.len(), 1);
}

#[test]
fn error_display() {
    let err = MapError::new(ErrorKind::Contention, EEXIST);
    assert_eq!(
        std::format!("{err}"),
        "address range of the mirror was taken (os error 17)"
    );

    let err = MapError::unsupported();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(err.errno(), 0);
}

#[cfg(all(feature = "libc", target_os = "linux"))]
mod system {
    use crate::{AliasedRegion, Mapper, VTable};
    use core::ffi::{c_int, c_void};
    use std::cell::Cell;

    std::thread_local! {
        static LIVE: Cell<isize> = const { Cell::new(0) };
        static UNMAPPED: Cell<usize> = const { Cell::new(0) };
    }

    fn counting() -> Mapper {
        fn _map_shared(len: usize) -> *mut c_void {
            let addr = (VTable::new_libc().map_shared)(len);
            if addr != libc::MAP_FAILED {
                LIVE.with(|l| l.set(l.get() + len as isize));
            }
            addr
        }

        fn _shrink(addr: *mut c_void, old_len: usize, new_len: usize) -> *mut c_void {
            let addr = (VTable::new_libc().shrink)(addr, old_len, new_len);
            if addr != libc::MAP_FAILED {
                LIVE.with(|l| l.set(l.get() - (old_len - new_len) as isize));
            }
            addr
        }

        fn _alias(addr: *mut c_void, len: usize, at: *mut c_void) -> *mut c_void {
            let addr = (VTable::new_libc().alias)(addr, len, at);
            if addr != libc::MAP_FAILED {
                LIVE.with(|l| l.set(l.get() + len as isize));
            }
            addr
        }

        fn _munmap(addr: *mut c_void, len: usize) -> c_int {
            LIVE.with(|l| l.set(l.get() - len as isize));
            UNMAPPED.with(|u| u.set(u.get() + len));
            (VTable::new_libc().munmap)(addr, len)
        }

        let mut vtable = VTable::new_libc();
        vtable.map_shared = _map_shared;
        vtable.shrink = _shrink;
        vtable.alias = _alias;
        vtable.munmap = _munmap;

        unsafe { Mapper::new_unchecked(vtable) }
    }

    fn initialize(mapper: &Mapper, minsize: usize) -> AliasedRegion {
        let options = Default::default();
        AliasedRegion::initialize_retrying(mapper, minsize, &options)
            .expect("failed to create mirrored region")
    }

    #[test]
    fn rounds_to_pages() {
        let mapper = Mapper::new();
        let page = mapper.page_size();

        for minsize in [1, page - 1, page, page + 1, 3 * page + 7] {
            let region = initialize(&mapper, minsize);
            assert_eq!(region.len() % page, 0);
            assert!(region.len() >= minsize);
            assert!(region.len() < minsize + page);
            assert_eq!(region.mapped_len(), 2 * region.len());
        }
    }

    #[test]
    fn halves_mirror_each_other() {
        let region = initialize(&Mapper::new(), 1);
        let len = region.len();
        let base = region.as_ptr();

        unsafe {
            // Freshly mapped and left zeroed by the sanity check.
            assert_eq!(*base, 0);

            base.add(10).write(0xab);
            assert_eq!(base.add(len + 10).read(), 0xab);

            base.add(len + len - 1).write(0xcd);
            assert_eq!(base.add(len - 1).read(), 0xcd);
        }
    }

    #[test]
    fn drop_releases_both_halves() {
        LIVE.with(|l| l.set(0));
        UNMAPPED.with(|u| u.set(0));

        let mapper = counting();
        let region = initialize(&mapper, 5 * mapper.page_size());
        let capacity = region.len();
        assert_eq!(LIVE.with(Cell::get), 2 * capacity as isize);

        let unmapped_before = UNMAPPED.with(Cell::get);
        drop(region);

        assert_eq!(LIVE.with(Cell::get), 0);
        assert_eq!(UNMAPPED.with(Cell::get) - unmapped_before, 2 * capacity);
    }

    #[test]
    fn moved_region_stays_valid() {
        let region = initialize(&Mapper::new(), 1);
        let base = region.as_ptr();
        let moved = std::boxed::Box::new(region);

        assert_eq!(moved.as_ptr(), base);
        unsafe {
            base.write(7);
            assert_eq!(moved.as_ptr().add(moved.len()).read(), 7);
        }
    }
}
