#![forbid(unsafe_code)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parking_lot::Mutex;
use std::sync::Arc;

use ubc_block::{BlockCache, ByteDevice, CacheConfig};
use ubc_error::Result;
use ubc_types::{BlockSize, ByteOffset, HandleId, Whence};

// ── In-memory ByteDevice for benchmarks (no file I/O) ──────────────────

#[derive(Debug, Clone, Default)]
struct MemByteDevice {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemByteDevice {
    fn with_len(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0_u8; len])),
        }
    }
}

impl ByteDevice for MemByteDevice {
    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.bytes.lock();
        let start = offset.0 as usize;
        if start >= bytes.len() {
            return Ok(0);
        }
        let take = buf.len().min(bytes.len() - start);
        buf[..take].copy_from_slice(&bytes[start..start + take]);
        Ok(take)
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = offset.0 as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn make_cache(block_count: usize, capacity: usize) -> (BlockCache<MemByteDevice>, HandleId) {
    let cache = BlockCache::new(CacheConfig {
        block_size: BlockSize::new(4096).expect("block size"),
        capacity_blocks: capacity,
    })
    .expect("cache");
    let handle = cache.open_device(MemByteDevice::with_len(4096 * block_count));
    (cache, handle)
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_cache_hit(c: &mut Criterion) {
    let (cache, handle) = make_cache(16, 8);
    let mut buf = vec![0_u8; 4096];

    // Warm up: read block 0 once (miss), then benchmark repeated hits.
    cache.seek(handle, 0, Whence::Set).expect("seek");
    cache.read(handle, &mut buf).expect("warmup");

    c.bench_function("cache_hit_4k", |b| {
        b.iter(|| {
            cache.seek(handle, 0, Whence::Set).expect("seek");
            let n = cache.read(black_box(handle), black_box(&mut buf)).expect("hit");
            black_box(n);
        });
    });
}

fn bench_cache_miss_evict(c: &mut Criterion) {
    // Capacity 1: every distinct block evicts the previous one.
    let (cache, handle) = make_cache(256, 1);
    let mut buf = vec![0_u8; 4096];

    let mut block = 0_u64;
    c.bench_function("cache_miss_evict_4k", |b| {
        b.iter(|| {
            let offset = (block % 256) * 4096;
            cache.seek(handle, offset as i64, Whence::Set).expect("seek");
            let n = cache.read(handle, black_box(&mut buf)).expect("miss");
            black_box(n);
            block += 1;
        });
    });
}

fn bench_mixed_working_set(c: &mut Criterion) {
    // 8-block capacity with a 16-block working set, roughly half hits.
    let (cache, handle) = make_cache(16, 8);
    let mut buf = vec![0_u8; 4096];

    let mut block = 0_u64;
    c.bench_function("cache_mixed_4k", |b| {
        b.iter(|| {
            let offset = (block % 16) * 4096;
            cache.seek(handle, offset as i64, Whence::Set).expect("seek");
            let n = cache.read(handle, black_box(&mut buf)).expect("read");
            black_box(n);
            block += 1;
        });
    });
}

fn bench_writeback_churn(c: &mut Criterion) {
    // Dirty evictions on every admission: writes 4 KiB, capacity 4.
    let (cache, handle) = make_cache(64, 4);
    let payload = vec![0x5A_u8; 4096];

    let mut block = 0_u64;
    c.bench_function("cache_writeback_churn_4k", |b| {
        b.iter(|| {
            let offset = (block % 64) * 4096;
            cache.seek(handle, offset as i64, Whence::Set).expect("seek");
            let n = cache.write(handle, black_box(&payload)).expect("write");
            black_box(n);
            block += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_cache_hit,
    bench_cache_miss_evict,
    bench_mixed_working_set,
    bench_writeback_churn
);
criterion_main!(benches);
