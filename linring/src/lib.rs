//! A linear ring buffer.
//!
//! A [`RingBuffer`] always presents its buffered bytes, and its free space, as one contiguous
//! slice. There is no special case for data that wraps around the end of the buffer, which makes
//! it a good fit for I/O loops that hand a pointer and a length to the OS:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::{stdin, stdout};
//!
//! let mut buffer = linring::LocalRingBuffer::new(64 * 1024)?;
//!
//! loop {
//!     if buffer.fill_from(stdin().lock())? == 0 {
//!         break;
//!     }
//!
//!     buffer.drain_into(stdout().lock())?;
//! }
//! # Ok(()) }
//! ```
//!
//! The contiguity comes from mapping the buffer's pages a second time, directly behind the
//! first mapping, see [`linring_map`]. Creating that mapping can fail, after which all
//! operations are infallible and free of syscalls.
//!
//! ## Concurrency
//!
//! A [`RingBuffer`] with the default [`Atomic`] size counter can be [split](RingBuffer::split)
//! into a [`Producer`] and a [`Consumer`] for two threads. With [`Plain`] it is meant for a single
//! thread and avoids the atomic updates.
//!
//! ## Without the trick
//!
//! [`IoBuffer`] offers the same style of interface by moving the buffered bytes to the front
//! when needed. [`Staging`] selects between both by configuration, falling back to the flat
//! buffer where mirrored mappings are not supported.
#![cfg_attr(not(feature = "std"), no_std)]
mod cursor;
mod ring;
mod split;

#[cfg(feature = "std")]
mod flat;
#[cfg(feature = "std")]
mod io;
#[cfg(feature = "std")]
mod staging;

pub use linring_map::{AliasedRegion, ErrorKind, InitOptions, MapError, Mapper};

pub use cursor::{Atomic, Plain, SizeCounter};
pub use ring::{Bytes, LocalRingBuffer, RingBuffer, DEFAULT_MIN_SIZE};
pub use split::{Consumer, Producer};

#[cfg(feature = "std")]
pub use flat::IoBuffer;
#[cfg(feature = "std")]
pub use staging::{BufferKind, Staging, StagingError, StagingOptions};
