#![forbid(unsafe_code)]
//! Timing harness for the block cache: sequential-write and scan-read
//! drivers, runnable with or without the cache in the path.
//!
//! The drivers are deliberately dumb loops — the system under test is the
//! cache, not the workload. Each driver repeats its workload for a number of
//! iterations and reports mean wall-clock seconds plus the cache's hit/miss
//! counters when the cached variant ran.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use ubc_block::{FileBlockCache, OpenFlags};

/// Outcome of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub benchmark: String,
    pub iterations: u32,
    pub use_cache: bool,
    pub avg_seconds: f64,
    pub per_iteration_seconds: Vec<f64>,
    /// Cache counters accumulated across all iterations; `None` for the
    /// direct (uncached) variant.
    pub cache_hits: Option<u64>,
    pub cache_misses: Option<u64>,
    /// Exponential moving average folded over the scanned bytes; `None` for
    /// write benchmarks.
    pub ema: Option<f64>,
}

impl BenchReport {
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: avg {:.6} s over {} iteration(s){}",
            self.benchmark,
            self.avg_seconds,
            self.iterations,
            if self.use_cache { " (cached)" } else { " (direct)" },
        );
        if let (Some(hits), Some(misses)) = (self.cache_hits, self.cache_misses) {
            line.push_str(&format!(", hits={hits} misses={misses}"));
        }
        line
    }
}

/// Parameters for [`run_seq_write`].
#[derive(Debug, Clone, Copy)]
pub struct SeqWriteConfig {
    pub file_size: u64,
    pub chunk_size: usize,
    pub iterations: u32,
    pub use_cache: bool,
}

impl Default for SeqWriteConfig {
    fn default() -> Self {
        Self {
            file_size: 256 * 1024 * 1024,
            chunk_size: 512,
            iterations: 1,
            use_cache: false,
        }
    }
}

/// Create/truncate `path` and write `file_size` bytes sequentially in
/// `chunk_size` chunks, fsync, close; repeated `iterations` times.
pub fn run_seq_write(path: &Path, config: &SeqWriteConfig) -> Result<BenchReport> {
    if config.iterations == 0 {
        bail!("iterations must be > 0");
    }
    if config.chunk_size == 0 {
        bail!("chunk size must be > 0");
    }
    let chunk = vec![b'a'; config.chunk_size];
    let mut durations = Vec::with_capacity(config.iterations as usize);
    let mut hits = 0_u64;
    let mut misses = 0_u64;

    for iteration in 0..config.iterations {
        let start = Instant::now();
        if config.use_cache {
            let cache = FileBlockCache::with_defaults()?;
            let handle = cache
                .open(path, &OpenFlags::create_truncate(0o644))
                .with_context(|| format!("open {} for cached write", path.display()))?;
            let mut written = 0_u64;
            while written < config.file_size {
                cache.write(handle, &chunk)?;
                written += chunk.len() as u64;
            }
            cache.fsync(handle)?;
            cache.close(handle)?;
            hits += cache.hit_count();
            misses += cache.miss_count();
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("open {} for direct write", path.display()))?;
            let mut written = 0_u64;
            while written < config.file_size {
                file.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            file.sync_all()?;
        }
        let elapsed = start.elapsed().as_secs_f64();
        debug!(iteration, elapsed, "seq-write iteration done");
        durations.push(elapsed);
    }

    Ok(report("seq-write", config.use_cache, durations, hits, misses, None))
}

/// Parameters for [`run_scan_read`].
#[derive(Debug, Clone, Copy)]
pub struct ScanReadConfig {
    pub chunk_size: usize,
    pub iterations: u32,
    pub use_cache: bool,
}

impl Default for ScanReadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            iterations: 1,
            use_cache: false,
        }
    }
}

/// Sequentially read `path` to end of file in `chunk_size` chunks, folding
/// the bytes into an exponential moving average so the loop stays
/// observable; repeated `iterations` times.
pub fn run_scan_read(path: &Path, config: &ScanReadConfig) -> Result<BenchReport> {
    if config.iterations == 0 {
        bail!("iterations must be > 0");
    }
    if config.chunk_size == 0 {
        bail!("chunk size must be > 0");
    }
    let mut buf = vec![0_u8; config.chunk_size];
    let mut durations = Vec::with_capacity(config.iterations as usize);
    let mut hits = 0_u64;
    let mut misses = 0_u64;
    let mut ema = 0.0_f64;

    for iteration in 0..config.iterations {
        let start = Instant::now();
        if config.use_cache {
            let cache = FileBlockCache::with_defaults()?;
            let handle = cache
                .open(path, &OpenFlags::read_only())
                .with_context(|| format!("open {} for cached scan", path.display()))?;
            loop {
                let n = cache.read(handle, &mut buf)?;
                if n == 0 {
                    break;
                }
                ema = fold_ema(ema, &buf[..n]);
            }
            cache.close(handle)?;
            hits += cache.hit_count();
            misses += cache.miss_count();
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .open(path)
                .with_context(|| format!("open {} for direct scan", path.display()))?;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                ema = fold_ema(ema, &buf[..n]);
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        debug!(iteration, elapsed, "scan-read iteration done");
        durations.push(elapsed);
    }

    Ok(report(
        "scan-read",
        config.use_cache,
        durations,
        hits,
        misses,
        Some(ema),
    ))
}

const EMA_ALPHA: f64 = 0.05;

fn fold_ema(mut ema: f64, bytes: &[u8]) -> f64 {
    for byte in bytes {
        ema = EMA_ALPHA * f64::from(*byte) + (1.0 - EMA_ALPHA) * ema;
    }
    ema
}

fn report(
    benchmark: &str,
    use_cache: bool,
    durations: Vec<f64>,
    hits: u64,
    misses: u64,
    ema: Option<f64>,
) -> BenchReport {
    let avg_seconds = durations.iter().sum::<f64>() / durations.len() as f64;
    BenchReport {
        benchmark: benchmark.to_owned(),
        iterations: durations.len() as u32,
        use_cache,
        avg_seconds,
        per_iteration_seconds: durations,
        cache_hits: use_cache.then_some(hits),
        cache_misses: use_cache.then_some(misses),
        ema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_ema_is_order_sensitive_but_bounded() {
        let forward = fold_ema(0.0, &[10, 200, 30]);
        let reverse = fold_ema(0.0, &[30, 200, 10]);
        assert_ne!(forward, reverse);
        assert!(forward > 0.0 && forward < 255.0);
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("never.bin");
        let config = SeqWriteConfig {
            iterations: 0,
            ..SeqWriteConfig::default()
        };
        assert!(run_seq_write(&path, &config).is_err());
    }
}
