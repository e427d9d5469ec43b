//! Source descriptors and the descriptor cache.
//!
//! A [`Source`] is the open handle on a log file that other processes keep
//! appending to. Targets never reopen it: they read at explicit offsets,
//! truncate it in place, and occasionally write recovered bytes back at its
//! head. All operations are positional so the descriptor's own cursor is
//! never relied upon.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Positional access to an open log file.
pub trait Source: Send + Sync + 'static {
    /// Current length in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Read into `buf` starting at `offset`; returns the number of bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write all of `buf` at `offset`.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Truncate to zero length.
    fn truncate(&self) -> io::Result<()>;

    /// Read exactly `len` bytes at `offset`, stopping early at end of file.
    fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A [`Source`] backed by a real file.
#[derive(Debug)]
pub struct FileSource {
    file: File,
}

impl FileSource {
    /// Open `path` for reading and writing, creating it if needed.
    ///
    /// Existing content is kept; it is relayed into the first output.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Open an existing `path` for reading and writing without creating it.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the file cannot be opened; a
    /// directory yields `ErrorKind::IsADirectory` (or `PermissionDenied` on
    /// some platforms).
    pub fn open_existing(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Metadata of the open file.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error.
    pub fn metadata(&self) -> io::Result<std::fs::Metadata> {
        self.file.metadata()
    }
}

impl Source for FileSource {
    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::write_all_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            let n = std::os::windows::fs::FileExt::seek_write(&self.file, buf, offset)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            buf = &buf[n..];
            offset += n as u64;
        }
        Ok(())
    }

    fn truncate(&self) -> io::Result<()> {
        self.file.set_len(0)
    }
}

/// Opens sources for targets. Swappable so tests can simulate racing writers.
pub trait SourceOpener: Send + Sync + 'static {
    /// Open (or create) the source at `path`.
    ///
    /// # Errors
    ///
    /// Returns the IO error that prevented opening.
    fn open(&self, path: &Path) -> io::Result<Arc<dyn Source>>;
}

/// Opens plain files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsOpener;

impl SourceOpener for FsOpener {
    fn open(&self, path: &Path) -> io::Result<Arc<dyn Source>> {
        Ok(Arc::new(FileSource::open(path)?))
    }
}

/// Open descriptors keyed by path, at most one per path.
///
/// Owned by the registry. A target acquires its descriptor here and releases
/// it on close; a second acquisition for the same path reuses the open
/// descriptor instead of opening another.
#[derive(Default)]
pub struct DescriptorCache {
    open: Mutex<HashMap<PathBuf, Arc<dyn Source>>>,
}

impl DescriptorCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached descriptor for `path`, opening it if absent.
    ///
    /// # Errors
    ///
    /// Returns the IO error from `opener` when a new descriptor is needed.
    pub fn acquire(&self, path: &Path, opener: &dyn SourceOpener) -> io::Result<Arc<dyn Source>> {
        let mut open = self.open.lock();
        if let Some(existing) = open.get(path) {
            debug!(path = %path.display(), "Reusing open descriptor");
            return Ok(Arc::clone(existing));
        }
        let source = opener.open(path)?;
        open.insert(path.to_path_buf(), Arc::clone(&source));
        Ok(source)
    }

    /// Evict `path` if it still maps to `source`.
    pub fn release(&self, path: &Path, source: &Arc<dyn Source>) -> bool {
        let mut open = self.open.lock();
        match open.get(path) {
            Some(cached) if Arc::ptr_eq(cached, source) => {
                open.remove(path);
                true
            },
            _ => false,
        }
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    /// Drop every cached descriptor.
    pub fn clear(&self) {
        self.open.lock().clear();
    }
}
