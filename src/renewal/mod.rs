//! Stream renewal: swapping a target's output file while its source stays
//! open and keeps growing.
//!
//! A file target owns a [`Relay`]: the source descriptor, the read cursor and
//! the live output. A background copier moves new bytes from the source to
//! the output every few seconds. Renewal stops the copier, flushes the tail
//! the copier has not reached yet into the old output, truncates the source
//! (confirming the truncate took effect), opens a fresh output and restarts
//! the copier from offset zero.
//!
//! Process-stream targets have no descriptor: their [`StreamSink`] is swapped
//! and every byte written through a [`StreamWriter`] lands in it.

mod confirm;
mod copier;
mod stream;

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub use confirm::{ConfirmOutcome, truncate_confirmed};
pub(crate) use copier::Copier;
pub use stream::{StreamSink, StreamWriter};

use crate::source::Source;

/// Marker appended to an output when it is closed after a relay.
pub const CLOSE_MARKER: &str = "[loglife] Close write stream.";

/// Attempts at finding a free output name before giving up.
const MAX_NAME_COLLISIONS: u32 = 100;

/// The live output of a target.
#[derive(Debug)]
pub(crate) struct Output {
    pub path: PathBuf,
    pub file: File,
}

/// Source, cursor and output of a file target.
///
/// Shared between the target and its copier behind an async mutex.
#[derive(Default)]
pub(crate) struct Relay {
    pub source: Option<Arc<dyn Source>>,
    /// Bytes of the source already written to the current output.
    pub cursor: u64,
    pub output: Option<Output>,
}

/// Result of flushing the unrelayed tail into the old output.
#[derive(Debug, Default)]
pub(crate) struct Flushed {
    /// Path of the output that was closed, if there was one.
    pub previous: Option<PathBuf>,
    /// Source length the flush read up to.
    pub pre_size: u64,
    /// Oldest bytes skipped because the tail exceeded the relay ceiling.
    pub dropped: u64,
}

impl Relay {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self {
            source: Some(source),
            cursor: 0,
            output: None,
        }
    }

    fn source(&self) -> io::Result<&Arc<dyn Source>> {
        self.source
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "source is closed"))
    }

    /// Copy at most `chunk` new bytes into the output. Returns bytes copied.
    ///
    /// A terminal run of zero bytes at end of file is left for the next call:
    /// it is space a racing writer has reserved but not yet filled.
    pub fn copy_chunk(&mut self, chunk: usize) -> io::Result<usize> {
        if self.output.is_none() {
            return Ok(0);
        }
        let source = Arc::clone(self.source()?);
        let size = source.size()?;
        if size <= self.cursor {
            return Ok(0);
        }
        let mut buf = source.read_range(self.cursor, chunk)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let reached_eof = self.cursor + buf.len() as u64 >= size;
        if reached_eof {
            let keep = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            buf.truncate(keep);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(output) = self.output.as_mut() {
            output.file.write_all(&buf)?;
        }
        self.cursor += buf.len() as u64;
        Ok(buf.len())
    }

    /// Write everything past the cursor (bounded by `ceiling`) plus the close
    /// marker to the current output, then close it.
    pub fn flush_and_close(&mut self, ceiling: u64, now: DateTime<Utc>) -> io::Result<Flushed> {
        let source = Arc::clone(self.source()?);
        let size = source.size()?;
        let Some(mut output) = self.output.take() else {
            return Ok(Flushed {
                previous: None,
                pre_size: size,
                dropped: 0,
            });
        };

        let mut unrelayed = size.saturating_sub(self.cursor);
        let mut dropped = 0;
        if unrelayed > ceiling {
            dropped = unrelayed - ceiling;
            self.cursor += dropped;
            unrelayed = ceiling;
        }
        if unrelayed > 0 {
            let len = usize::try_from(unrelayed).map_err(io::Error::other)?;
            let bytes = source.read_range(self.cursor, len)?;
            output.file.write_all(&bytes)?;
            self.cursor += bytes.len() as u64;
            writeln!(output.file, "{} - {CLOSE_MARKER}", now.to_rfc2822())?;
        }
        output.file.flush()?;
        debug!(output = %output.path.display(), bytes = unrelayed, "Closed output");
        Ok(Flushed {
            previous: Some(output.path),
            pre_size: size,
            dropped,
        })
    }
}

/// Create a fresh output file at `path`, or at `path` with a `_N` suffix on
/// its stem if that name is taken.
pub(crate) fn create_output(path: &Path) -> io::Result<Output> {
    let mut candidate = path.to_path_buf();
    for n in 1..=MAX_NAME_COLLISIONS {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                return Ok(Output {
                    path: candidate,
                    file,
                });
            },
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = suffixed(path, n);
            },
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free output name near {}", path.display()),
    ))
}

fn suffixed(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// Point `link` at `output`, replacing an existing symlink.
///
/// A regular file at `link` is left alone: it is a live source.
pub(crate) fn refresh_symlink(link: &Path, output: &Path) {
    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if let Err(e) = std::fs::remove_file(link) {
                warn!(link = %link.display(), error = %e, "Failed to remove old symlink");
                return;
            }
        },
        Ok(_) => {
            warn!(link = %link.display(), "Refusing to replace a regular file with a symlink");
            return;
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => {
            warn!(link = %link.display(), error = %e, "Failed to inspect symlink path");
            return;
        },
    }

    #[cfg(unix)]
    match std::os::unix::fs::symlink(output, link) {
        Ok(()) => info!(link = %link.display(), output = %output.display(), "Symlink refreshed"),
        Err(e) => warn!(link = %link.display(), error = %e, "Failed to create symlink"),
    }

    #[cfg(not(unix))]
    warn!(
        link = %link.display(),
        output = %output.display(),
        "Symlinks are not supported on this platform, skipping"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileSource;
    use tempfile::TempDir;

    fn relay_with_output(dir: &TempDir, content: &[u8]) -> Relay {
        let src = dir.path().join("app.log");
        std::fs::write(&src, content).unwrap();
        let mut relay = Relay::new(Arc::new(FileSource::open(&src).unwrap()));
        relay.output = Some(create_output(&dir.path().join("app.1.log")).unwrap());
        relay
    }

    #[test]
    fn test_copy_chunk_advances_cursor() {
        let tmp = TempDir::new().unwrap();
        let mut relay = relay_with_output(&tmp, b"abcdefgh");

        assert_eq!(relay.copy_chunk(5).unwrap(), 5);
        assert_eq!(relay.cursor, 5);
        assert_eq!(relay.copy_chunk(5).unwrap(), 3);
        assert_eq!(relay.copy_chunk(5).unwrap(), 0);
        assert_eq!(std::fs::read(tmp.path().join("app.1.log")).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_copy_chunk_leaves_terminal_zero_run() {
        let tmp = TempDir::new().unwrap();
        let mut relay = relay_with_output(&tmp, b"abc\0\0\0");

        assert_eq!(relay.copy_chunk(64).unwrap(), 3);
        assert_eq!(relay.cursor, 3);
        assert_eq!(relay.copy_chunk(64).unwrap(), 0);
        assert_eq!(relay.cursor, 3);
    }

    #[test]
    fn test_copy_chunk_keeps_zeros_before_eof() {
        let tmp = TempDir::new().unwrap();
        let mut relay = relay_with_output(&tmp, b"a\0\0bcd");

        assert_eq!(relay.copy_chunk(3).unwrap(), 3);
        assert_eq!(relay.copy_chunk(3).unwrap(), 3);
        assert_eq!(std::fs::read(tmp.path().join("app.1.log")).unwrap(), b"a\0\0bcd");
    }

    #[test]
    fn test_flush_bounded_by_ceiling() {
        let tmp = TempDir::new().unwrap();
        let mut relay = relay_with_output(&tmp, b"0123456789");
        relay.cursor = 2;

        let flushed = relay.flush_and_close(4, Utc::now()).unwrap();
        assert_eq!(flushed.dropped, 4);
        assert_eq!(flushed.pre_size, 10);
        assert_eq!(relay.cursor, 10);
        assert!(relay.output.is_none());

        let written = std::fs::read_to_string(tmp.path().join("app.1.log")).unwrap();
        assert!(written.starts_with("6789"));
        assert!(written.trim_end().ends_with(CLOSE_MARKER));
    }

    #[test]
    fn test_flush_without_output_reports_size_only() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("app.log");
        std::fs::write(&src, b"xyz").unwrap();
        let mut relay = Relay::new(Arc::new(FileSource::open(&src).unwrap()));

        let flushed = relay.flush_and_close(1024, Utc::now()).unwrap();
        assert!(flushed.previous.is_none());
        assert_eq!(flushed.pre_size, 3);
    }

    #[test]
    fn test_create_output_avoids_collisions() {
        let tmp = TempDir::new().unwrap();
        let wanted = tmp.path().join("app.261017_090000.log");
        let first = create_output(&wanted).unwrap();
        let second = create_output(&wanted).unwrap();
        assert_eq!(first.path, wanted);
        assert_eq!(second.path, tmp.path().join("app.261017_090000_1.log"));
    }

    #[cfg(unix)]
    #[test]
    fn test_refresh_symlink_replaces_link_not_file() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("current");
        let a = tmp.path().join("a.log");
        let b = tmp.path().join("b.log");
        std::fs::write(&a, b"").unwrap();
        std::fs::write(&b, b"").unwrap();

        refresh_symlink(&link, &a);
        assert_eq!(std::fs::read_link(&link).unwrap(), a);
        refresh_symlink(&link, &b);
        assert_eq!(std::fs::read_link(&link).unwrap(), b);

        refresh_symlink(&a, &b);
        assert!(std::fs::symlink_metadata(&a).unwrap().file_type().is_file());
    }
}
