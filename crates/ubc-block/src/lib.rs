#![forbid(unsafe_code)]
//! User-space block buffer cache.
//!
//! Sits between an application and raw file I/O: byte-range reads and writes
//! on logical handles are grouped into fixed-size aligned blocks, a bounded
//! number of blocks is cached in memory, and modified blocks are lazily
//! written back to the backing store.
//!
//! - [`ByteDevice`] / [`FileByteDevice`]: the backing store adapter —
//!   positioned reads and writes plus a sync primitive, no cache state.
//! - [`BlockCache`]: the engine — handle table, bounded block store,
//!   second-chance eviction queue, and hit/miss counters, all behind one
//!   coarse lock per instance.
//!
//! ```no_run
//! use ubc_block::{FileBlockCache, OpenFlags, Whence};
//!
//! # fn main() -> ubc_error::Result<()> {
//! let cache = FileBlockCache::with_defaults()?;
//! let handle = cache.open("data.bin", &OpenFlags::create_truncate(0o644))?;
//! cache.write(handle, b"hello")?;
//! cache.seek(handle, 0, Whence::Set)?;
//! let mut buf = [0_u8; 5];
//! cache.read(handle, &mut buf)?;
//! cache.close(handle)?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod device;

pub use cache::{BlockCache, CacheConfig, CacheMetrics, FileBlockCache};
pub use device::{ByteDevice, FileByteDevice, OpenFlags};

pub use ubc_types::{BlockIndex, BlockSize, ByteOffset, CacheKey, HandleId, Whence};
