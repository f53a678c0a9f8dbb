//! Mirrored memory mappings.
//!
//! The pages of an [`AliasedRegion`] are mapped twice, back to back. A buffer of `len` bytes
//! placed in it can hand out any run of up to `len` bytes starting at any offset as one slice, no
//! matter where the physical end of the pages falls.
//!
//! ## Platform support
//!
//! Placing the second mapping needs an OS that can duplicate a shared mapping to a fixed address.
//! All OS interaction goes through a [`VTable`] of functions. With the `libc` feature on Linux,
//! [`Mapper::new`] provides the default table. Elsewhere [`Mapper::system`] is `None` and callers
//! are expected to fall back to a buffer that does not need the trick.
//!
//! ## Races
//!
//! Initialization is not atomic with respect to other threads creating mappings. Such a race
//! surfaces as [`ErrorKind::Contention`] and leaves nothing mapped; it can be retried, or avoided
//! by allocating before spawning threads.
#![cfg_attr(not(feature = "std"), no_std)]
mod error;
mod region;
mod vtable;

#[cfg(test)]
mod tests;

extern crate alloc;
#[cfg(all(test, not(feature = "std")))]
extern crate std;

pub use error::{ErrorKind, MapError};
pub use region::{AliasedRegion, InitOptions};
pub use vtable::{Mapper, VTable};
