#![forbid(unsafe_code)]
//! Shared newtypes and constants for the user-space block cache.
//!
//! These are unit-carrying wrappers so that logical handles, block indexes,
//! and byte offsets cannot be mixed up at call sites. Everything here is
//! plain data; behavior lives in `ubc-block`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default cache block size in bytes.
///
/// Blocks are addressed at byte offset `block_index * BLOCK_SIZE` on the
/// backing device. This constant is part of the on-disk contract: peers
/// reading the same file must agree on it.
pub const BLOCK_SIZE: u32 = 4096;

/// Default maximum number of resident blocks per cache instance.
///
/// 32 blocks of 4096 bytes = 128 KiB of cached data, global across all open
/// handles of the instance.
pub const MAX_CACHE_BLOCKS: usize = 32;

/// Logical handle returned by `open`, valid until `close`.
///
/// Handle ids are allocated from a per-cache monotonic counter and are never
/// reused, so a stale id can never alias a later open (unlike raw OS
/// descriptor numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a fixed-size block within a backing file (`byte_offset / block_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u64);

/// Identity of a cached block: which handle it belongs to and where it sits
/// in that handle's backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub handle: HandleId,
    pub block: BlockIndex,
}

/// Byte offset on a `ByteDevice` (pread/pwrite semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Seek origin. Only `Set` (absolute positioning) is supported by the cache;
/// the other origins exist so callers get `InvalidArgument` instead of a
/// compile error when porting `lseek`-shaped code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    /// Absolute offset from the start of the file.
    Set,
    /// Relative to the current cursor (unsupported).
    Cur,
    /// Relative to end of file (unsupported).
    End,
}

impl std::fmt::Display for Whence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Set => "SET",
            Self::Cur => "CUR",
            Self::End => "END",
        };
        f.write_str(name)
    }
}

/// Error returned when constructing a [`BlockSize`] from an invalid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid block size {0}: must be a power of two in 512..=65536")]
pub struct InvalidBlockSize(pub u32);

/// Validated cache block size (power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [512, 65536].
    pub fn new(value: u32) -> Result<Self, InvalidBlockSize> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(InvalidBlockSize(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of bits to shift to convert between bytes and blocks.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Convert a byte offset to the index of the block containing it.
    #[must_use]
    pub fn byte_to_block(self, byte_offset: u64) -> BlockIndex {
        BlockIndex(byte_offset >> u64::from(self.shift()))
    }

    /// Offset of a byte within its block.
    #[must_use]
    pub fn offset_in_block(self, byte_offset: u64) -> usize {
        (byte_offset & u64::from(self.0 - 1)) as usize
    }

    /// Byte offset of the start of a block, `None` on overflow.
    #[must_use]
    pub fn block_to_byte(self, block: BlockIndex) -> Option<ByteOffset> {
        block.0.checked_mul(u64::from(self.0)).map(ByteOffset)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_accepts_powers_of_two() {
        for size in [512_u32, 1024, 4096, 65536] {
            assert_eq!(BlockSize::new(size).map(BlockSize::get), Ok(size));
        }
    }

    #[test]
    fn block_size_rejects_out_of_range_and_non_powers() {
        for size in [0_u32, 256, 1000, 4097, 131_072] {
            assert_eq!(BlockSize::new(size), Err(InvalidBlockSize(size)));
        }
    }

    #[test]
    fn byte_block_conversions() {
        let bs = BlockSize::new(4096).expect("block size");
        assert_eq!(bs.byte_to_block(0), BlockIndex(0));
        assert_eq!(bs.byte_to_block(4095), BlockIndex(0));
        assert_eq!(bs.byte_to_block(4096), BlockIndex(1));
        assert_eq!(bs.offset_in_block(4097), 1);
        assert_eq!(bs.block_to_byte(BlockIndex(3)), Some(ByteOffset(12288)));
        assert_eq!(bs.block_to_byte(BlockIndex(u64::MAX)), None);
    }

    #[test]
    fn default_block_size_matches_constant() {
        assert_eq!(BlockSize::default().get(), BLOCK_SIZE);
    }

    #[test]
    fn byte_offset_checked_add() {
        assert_eq!(ByteOffset(10).checked_add(5), Some(ByteOffset(15)));
        assert_eq!(ByteOffset(u64::MAX).checked_add(1), None);
    }
}
