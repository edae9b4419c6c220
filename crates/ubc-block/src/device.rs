//! Backing store adapter: offset-addressed I/O against an underlying device.
//!
//! The cache engine never seeks the backing device; all I/O is positioned
//! (`pread`/`pwrite` semantics) so a device can be shared safely behind the
//! cache's lock. The device owns no cache state.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use ubc_error::Result;
use ubc_types::ByteOffset;

/// Byte-addressed backing device.
///
/// `read_at` has short-read semantics: it returns the number of bytes
/// actually read, `0` at end of file, and never blocks waiting for bytes
/// past EOF. `write_all_at` extends the device as needed.
pub trait ByteDevice: Send {
    /// Read up to `buf.len()` bytes from `offset`. Returns the count read
    /// (possibly short), `0` at end of file.
    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes in `buf` at `offset`, growing the device if the range
    /// lies past the current end.
    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Open flags for [`FileByteDevice::open`], mirroring the `open(2)` flag and
/// mode arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    /// Unix permission bits applied when `create` makes the file.
    pub mode: u32,
}

impl OpenFlags {
    /// `O_RDONLY`
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            truncate: false,
            mode: 0o644,
        }
    }

    /// `O_RDWR`
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            write: true,
            ..Self::read_only()
        }
    }

    /// `O_CREAT | O_RDWR | O_TRUNC` with the given permission bits, the
    /// usual shape for a freshly produced output file.
    #[must_use]
    pub fn create_truncate(mode: u32) -> Self {
        Self {
            create: true,
            truncate: true,
            mode,
            ..Self::read_write()
        }
    }
}

/// File-backed byte device using positioned I/O (`std::os::unix::fs::FileExt`).
///
/// Positioned reads and writes do not touch the file's seek cursor; the
/// cache keeps its own per-handle cursor instead.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
}

impl FileByteDevice {
    /// Open `path` with the given flags and permission bits.
    pub fn open(path: impl AsRef<Path>, flags: &OpenFlags) -> Result<Self> {
        let file = OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate)
            .mode(flags.mode)
            .open(path.as_ref())?;
        Ok(Self { file })
    }

    /// Wrap an already-open file.
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl ByteDevice for FileByteDevice {
    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read_at(buf, offset.0)?)
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset.0)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_at_is_short_at_eof() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(b"hello").expect("seed");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path(), &OpenFlags::read_only()).expect("open");
        let mut buf = [0_u8; 16];
        assert_eq!(dev.read_at(ByteOffset(0), &mut buf).expect("read"), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(dev.read_at(ByteOffset(5), &mut buf).expect("read eof"), 0);
        assert_eq!(dev.read_at(ByteOffset(100), &mut buf).expect("read past"), 0);
    }

    #[test]
    fn write_all_at_extends_the_file() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let dev = FileByteDevice::open(tmp.path(), &OpenFlags::read_write()).expect("open");

        dev.write_all_at(ByteOffset(10), b"abc").expect("write");
        dev.sync().expect("sync");

        let bytes = std::fs::read(tmp.path()).expect("read back");
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[10..], b"abc");
        assert!(bytes[..10].iter().all(|b| *b == 0));
    }

    #[test]
    fn create_truncate_discards_previous_content() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(b"old content").expect("seed");
        tmp.flush().expect("flush");

        let dev =
            FileByteDevice::open(tmp.path(), &OpenFlags::create_truncate(0o644)).expect("open");
        let mut buf = [0_u8; 4];
        assert_eq!(dev.read_at(ByteOffset(0), &mut buf).expect("read"), 0);
    }
}
