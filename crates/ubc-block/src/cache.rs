//! Block cache engine: handle table, block store, and second-chance eviction.
//!
//! One [`BlockCache`] instance owns a bounded set of fixed-size blocks shared
//! by all of its open handles. Reads and writes are split into block-aligned
//! segments; misses load whole blocks from the backing device, writes mark
//! blocks dirty and are written back lazily on eviction, `fsync`, or `close`.
//!
//! All state lives behind a single coarse mutex. The eviction sweep and block
//! mutation touch shared structures that must never be observed half-updated,
//! so no operation runs lock-free; per-key locking would have to keep the
//! sweep's pop/requeue loop and a concurrent miss-insertion from racing on
//! queue membership, and nothing here is hot enough to justify that.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::device::{ByteDevice, FileByteDevice, OpenFlags};
use ubc_error::{Result, UbcError};
use ubc_types::{BlockIndex, BlockSize, ByteOffset, CacheKey, HandleId, Whence, MAX_CACHE_BLOCKS};

/// Cache construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Granularity of caching and backing-store I/O.
    pub block_size: BlockSize,
    /// Maximum resident blocks, global across all handles of the instance.
    pub capacity_blocks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::default(),
            capacity_blocks: MAX_CACHE_BLOCKS,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub resident_blocks: usize,
    pub dirty_blocks: usize,
    pub capacity: usize,
}

/// A resident cached block.
///
/// `data` is always exactly one block long; a short read on load zero-pads
/// the tail so the hit path never has to track a valid length.
#[derive(Debug)]
struct Block {
    data: Vec<u8>,
    dirty: bool,
    referenced: bool,
}

#[derive(Debug)]
struct HandleEntry<D> {
    device: D,
    cursor: u64,
}

#[derive(Debug)]
struct CacheState<D> {
    block_size: BlockSize,
    capacity: usize,
    next_handle: u64,
    handles: HashMap<HandleId, HandleEntry<D>>,
    store: HashMap<CacheKey, Block>,
    /// Residency order for the second-chance sweep. Invariant: the key set
    /// of `queue` equals the key set of `store`; both are only mutated
    /// together inside this module.
    queue: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl<D: ByteDevice> CacheState<D> {
    fn cursor_of(&self, handle: HandleId) -> Result<u64> {
        self.handles
            .get(&handle)
            .map(|entry| entry.cursor)
            .ok_or(UbcError::BadHandle(handle.0))
    }

    fn set_cursor(&mut self, handle: HandleId, cursor: u64) {
        if let Some(entry) = self.handles.get_mut(&handle) {
            entry.cursor = cursor;
        }
    }

    fn block_offset(&self, block: BlockIndex) -> Result<ByteOffset> {
        self.block_size
            .block_to_byte(block)
            .ok_or_else(|| UbcError::InvalidArgument(format!("block {} offset overflows u64", block.0)))
    }

    /// Evict exactly one block to make room for an admission.
    ///
    /// Second-chance sweep over the residency queue: a referenced front key
    /// has its bit cleared and is requeued; the first unreferenced key is the
    /// victim. Each key resident at entry gets at most one requeue, so after
    /// one full sweep the original front is evicted regardless and the pass
    /// always terminates.
    ///
    /// A dirty victim is flushed first. If the flush fails the victim stays
    /// resident (requeued at the front, dirty bit intact) and the error
    /// propagates to the operation that triggered the admission.
    fn evict_one(&mut self) -> Result<()> {
        let mut chances = self.queue.len();
        while let Some(key) = self.queue.pop_front() {
            let Some(block) = self.store.get_mut(&key) else {
                debug_assert!(false, "queue key absent from store");
                continue;
            };
            if block.referenced && chances > 0 {
                block.referenced = false;
                self.queue.push_back(key);
                chances -= 1;
                continue;
            }
            if block.dirty {
                let offset = self
                    .block_size
                    .block_to_byte(key.block)
                    .ok_or_else(|| {
                        UbcError::InvalidArgument(format!("block {} offset overflows u64", key.block.0))
                    })?;
                // close() purges a handle's residency, so the owning handle
                // is always present here.
                let flushed = match self.handles.get(&key.handle) {
                    Some(entry) => entry.device.write_all_at(offset, &block.data),
                    None => Ok(()),
                };
                if let Err(err) = flushed {
                    warn!(
                        handle = key.handle.0,
                        block = key.block.0,
                        error = %err,
                        "victim flush failed; leaving block resident"
                    );
                    self.queue.push_front(key);
                    return Err(err);
                }
            }
            trace!(
                handle = key.handle.0,
                block = key.block.0,
                dirty = block.dirty,
                "evicting block"
            );
            self.store.remove(&key);
            return Ok(());
        }
        // Empty queue means an empty store; nothing to evict.
        Ok(())
    }

    /// Load the block at `key` from the backing device into `buf`.
    ///
    /// Returns the number of valid bytes read; the remainder of `buf` is
    /// left zeroed, so the resulting block is always full-size.
    fn load_block(&mut self, key: CacheKey, buf: &mut [u8]) -> Result<usize> {
        if self.store.len() >= self.capacity {
            self.evict_one()?;
        }
        let offset = self.block_offset(key.block)?;
        let entry = self
            .handles
            .get(&key.handle)
            .ok_or(UbcError::BadHandle(key.handle.0))?;
        entry.device.read_at(offset, buf)
    }

    fn read(&mut self, handle: HandleId, out: &mut [u8]) -> Result<usize> {
        let mut cursor = self.cursor_of(handle)?;
        let bs = self.block_size.as_usize();
        let mut produced = 0_usize;

        while produced < out.len() {
            let block = self.block_size.byte_to_block(cursor);
            let block_off = self.block_size.offset_in_block(cursor);
            let want = (bs - block_off).min(out.len() - produced);
            let key = CacheKey { handle, block };

            if let Some(resident) = self.store.get_mut(&key) {
                self.hits += 1;
                resident.referenced = true;
                out[produced..produced + want]
                    .copy_from_slice(&resident.data[block_off..block_off + want]);
                produced += want;
                cursor += want as u64;
                continue;
            }

            self.misses += 1;
            let mut data = vec![0_u8; bs];
            let got = self.load_block(key, &mut data)?;
            if got == 0 {
                // True end of file at this block; nothing worth caching.
                break;
            }
            let take = if got > block_off {
                want.min(got - block_off)
            } else {
                0
            };
            if take > 0 {
                out[produced..produced + take].copy_from_slice(&data[block_off..block_off + take]);
            }
            let short = take < want;
            self.store.insert(
                key,
                Block {
                    data,
                    dirty: false,
                    referenced: true,
                },
            );
            self.queue.push_back(key);
            if take == 0 {
                break;
            }
            produced += take;
            cursor += take as u64;
            if short {
                // End of file inside this block: report the true length
                // instead of serving the zero padding.
                break;
            }
        }

        self.set_cursor(handle, cursor);
        Ok(produced)
    }

    fn write(&mut self, handle: HandleId, data_in: &[u8]) -> Result<usize> {
        let mut cursor = self.cursor_of(handle)?;
        let bs = self.block_size.as_usize();
        let mut written = 0_usize;

        while written < data_in.len() {
            let block = self.block_size.byte_to_block(cursor);
            let block_off = self.block_size.offset_in_block(cursor);
            let to_write = (bs - block_off).min(data_in.len() - written);
            let key = CacheKey { handle, block };

            if self.store.contains_key(&key) {
                self.hits += 1;
            } else {
                // Read-modify-write: the write may cover only part of the
                // block, so the rest must come from the backing store. Zero
                // result means a fresh block past EOF; a short result leaves
                // the tail zeroed.
                self.misses += 1;
                let mut data = vec![0_u8; bs];
                let _valid = self.load_block(key, &mut data)?;
                self.store.insert(
                    key,
                    Block {
                        data,
                        dirty: false,
                        referenced: true,
                    },
                );
                self.queue.push_back(key);
            }

            let Some(resident) = self.store.get_mut(&key) else {
                debug_assert!(false, "block inserted above must be resident");
                break;
            };
            resident.referenced = true;
            resident.data[block_off..block_off + to_write]
                .copy_from_slice(&data_in[written..written + to_write]);
            resident.dirty = true;

            written += to_write;
            cursor += to_write as u64;
        }

        self.set_cursor(handle, cursor);
        Ok(written)
    }

    fn seek(&mut self, handle: HandleId, offset: i64, whence: Whence) -> Result<u64> {
        let entry = self
            .handles
            .get_mut(&handle)
            .ok_or(UbcError::BadHandle(handle.0))?;
        if whence != Whence::Set {
            return Err(UbcError::InvalidArgument(format!(
                "whence {whence} is not supported"
            )));
        }
        if offset < 0 {
            return Err(UbcError::InvalidArgument(format!(
                "negative seek offset {offset}"
            )));
        }
        entry.cursor = offset as u64;
        Ok(entry.cursor)
    }

    /// Flush every dirty block of `handle`, then sync the backing device.
    ///
    /// A flush failure aborts immediately, leaving the remaining dirty flags
    /// set. Flushing never evicts: residency and referenced bits are
    /// untouched, only the dirty flag is cleared.
    fn fsync(&mut self, handle: HandleId) -> Result<()> {
        let entry = self
            .handles
            .get(&handle)
            .ok_or(UbcError::BadHandle(handle.0))?;
        let mut flushed = 0_usize;
        for (key, block) in self.store.iter_mut() {
            if key.handle != handle || !block.dirty {
                continue;
            }
            let offset = self
                .block_size
                .block_to_byte(key.block)
                .ok_or_else(|| {
                    UbcError::InvalidArgument(format!("block {} offset overflows u64", key.block.0))
                })?;
            entry.device.write_all_at(offset, &block.data)?;
            block.dirty = false;
            flushed += 1;
        }
        debug!(handle = handle.0, flushed, "fsync flushed dirty blocks");
        entry.device.sync()
    }

    /// Close always releases the handle. A flush failure is reported but
    /// does not keep the entry alive: unflushed blocks are discarded along
    /// with the rest of the handle's residency.
    fn close(&mut self, handle: HandleId) -> Result<()> {
        let flush = self.fsync(handle);
        if let Err(err) = &flush {
            warn!(handle = handle.0, error = %err, "flush on close failed, discarding dirty blocks");
        }
        // Purge the handle's residency so the recycled key space of a future
        // open can never alias these blocks.
        self.store.retain(|key, _| key.handle != handle);
        self.queue.retain(|key| key.handle != handle);
        // Dropping the entry closes the backing device.
        let _ = self.handles.remove(&handle);
        debug!(handle = handle.0, "closed handle");
        flush
    }

    fn dirty_blocks(&self) -> usize {
        self.store.values().filter(|block| block.dirty).count()
    }
}

/// Block cache over any [`ByteDevice`] backing.
///
/// Independent instances are fully isolated: capacity, counters, and
/// residency are all per-instance, never process-global.
#[derive(Debug)]
pub struct BlockCache<D: ByteDevice> {
    state: Mutex<CacheState<D>>,
}

/// The common file-backed configuration.
pub type FileBlockCache = BlockCache<FileByteDevice>;

impl<D: ByteDevice> BlockCache<D> {
    /// Create a cache with the given geometry.
    pub fn new(config: CacheConfig) -> Result<Self> {
        if config.capacity_blocks == 0 {
            return Err(UbcError::Config("capacity_blocks must be > 0".to_owned()));
        }
        Ok(Self {
            state: Mutex::new(CacheState {
                block_size: config.block_size,
                capacity: config.capacity_blocks,
                next_handle: 1,
                handles: HashMap::new(),
                store: HashMap::new(),
                queue: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        })
    }

    /// Create a cache with the default geometry (4 KiB blocks, 32 resident).
    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::default())
    }

    /// Register an already-open backing device and return its logical handle.
    ///
    /// The cursor starts at 0. Handle ids are monotonic and never reused.
    pub fn open_device(&self, device: D) -> HandleId {
        let mut state = self.state.lock();
        let handle = HandleId(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(handle, HandleEntry { device, cursor: 0 });
        debug!(handle = handle.0, "opened handle");
        handle
    }

    /// Read up to `out.len()` bytes at the handle's cursor.
    ///
    /// Returns the bytes produced, which is short only at end of file. An
    /// I/O error on a miss load aborts the call without advancing the
    /// cursor; bytes copied before the failure are discarded.
    pub fn read(&self, handle: HandleId, out: &mut [u8]) -> Result<usize> {
        self.state.lock().read(handle, out)
    }

    /// Write `data.len()` bytes at the handle's cursor.
    ///
    /// Absent an I/O error this always writes the full slice: blocks are
    /// loaded (read-modify-write) on miss and overwritten in memory, so a
    /// short backing read never shortens the write.
    pub fn write(&self, handle: HandleId, data: &[u8]) -> Result<usize> {
        self.state.lock().write(handle, data)
    }

    /// Set the handle's cursor. Only [`Whence::Set`] with a non-negative
    /// offset is accepted; seeking past end of file is legal.
    pub fn seek(&self, handle: HandleId, offset: i64, whence: Whence) -> Result<u64> {
        self.state.lock().seek(handle, offset, whence)
    }

    /// Flush the handle's dirty blocks and sync the backing device.
    pub fn fsync(&self, handle: HandleId) -> Result<()> {
        self.state.lock().fsync(handle)
    }

    /// Flush, purge the handle's resident blocks, and close the backing
    /// device.
    ///
    /// The handle is released even when the flush fails; the error is
    /// returned and any unflushed dirty blocks are lost with it.
    pub fn close(&self, handle: HandleId) -> Result<()> {
        self.state.lock().close(handle)
    }

    pub fn hit_count(&self) -> u64 {
        self.state.lock().hits
    }

    pub fn miss_count(&self) -> u64 {
        self.state.lock().misses
    }

    pub fn reset_counters(&self) {
        let mut state = self.state.lock();
        state.hits = 0;
        state.misses = 0;
    }

    /// Snapshot of counters and residency.
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        CacheMetrics {
            hits: state.hits,
            misses: state.misses,
            resident_blocks: state.store.len(),
            dirty_blocks: state.dirty_blocks(),
            capacity: state.capacity,
        }
    }
}

impl BlockCache<FileByteDevice> {
    /// Open `path` with the given flags and register it, returning the
    /// logical handle. On failure nothing is registered.
    pub fn open(&self, path: impl AsRef<Path>, flags: &OpenFlags) -> Result<HandleId> {
        let device = FileByteDevice::open(path, flags)?;
        Ok(self.open_device(device))
    }
}
