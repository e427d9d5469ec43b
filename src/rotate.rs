//! One-shot copy-truncate rotation, independent of any registry.

use std::fs::Metadata;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{Error, Result};
use crate::naming::{DefaultNamingPolicy, NamingPolicy};
use crate::reliability::RetryConfig;
use crate::renewal::{create_output, truncate_confirmed};
use crate::source::{FileSource, Source};

/// Veto hook: return `false` to leave the file alone.
pub type RotatePredicate<'a> = &'a (dyn Fn(&Metadata) -> bool + Send + Sync);

/// Options for [`rotate`].
#[derive(Debug, Clone)]
pub struct RotateOptions {
    /// Extension of the copy, including the dot. Defaults to the source's.
    pub ext: Option<String>,
    pub confirm: RetryConfig,
}

impl Default for RotateOptions {
    fn default() -> Self {
        Self {
            ext: None,
            confirm: RetryConfig::truncate_confirm(),
        }
    }
}

impl RotateOptions {
    /// Use `ext` for the copy.
    #[must_use]
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }
}

/// Where a one-shot rotation put the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub extension: String,
    pub timestamp: DateTime<Utc>,
}

/// Copy `path` into `<path without extension>_<yyMMdd_HHmmss><ext>` and
/// truncate it, confirming the truncate took effect.
///
/// An existing copy is never overwritten: a second rotation within the same
/// second lands in `<stem>_<yyMMdd_HHmmss>_1<ext>`, and so on.
///
/// Returns `Ok(None)` when `path` is a directory or `predicate` vetoes the
/// rotation.
///
/// # Errors
///
/// Returns an IO error if the source cannot be opened, copied or truncated.
pub async fn rotate(
    path: &Path,
    predicate: Option<RotatePredicate<'_>>,
    options: &RotateOptions,
) -> Result<Option<RotateOutcome>> {
    let timestamp = Utc::now();
    let owned = path.to_path_buf();
    let opened = tokio::task::spawn_blocking(move || -> io::Result<Option<(FileSource, Metadata)>> {
        if std::fs::metadata(&owned)?.is_dir() {
            return Ok(None);
        }
        let source = match FileSource::open_existing(&owned) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::IsADirectory => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta = source.metadata()?;
        Ok(Some((source, meta)))
    })
    .await?
    .map_err(|e| Error::io_at("open", path, e))?;

    let Some((source, meta)) = opened else {
        info!(path = %path.display(), "Rotate skipped: path is a directory");
        return Ok(None);
    };
    if let Some(predicate) = predicate
        && !predicate(&meta)
    {
        info!(path = %path.display(), "Rotate vetoed by predicate");
        return Ok(None);
    }

    let extension = options.ext.clone().unwrap_or_else(|| {
        path.extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    });
    let stamp = DefaultNamingPolicy::new().format_timestamp(timestamp);
    let mut name = path.with_extension("").into_os_string();
    name.push(format!("_{stamp}{extension}"));
    let wanted = PathBuf::from(name);

    let source: Arc<dyn Source> = Arc::new(source);
    let size = meta.len();
    let (reader, dst) = (Arc::clone(&source), wanted.clone());
    let destination = tokio::task::spawn_blocking(move || copy_prefix(reader.as_ref(), size, &dst))
        .await?
        .map_err(|e| Error::io_at("copy to", &wanted, e))?;

    truncate_confirmed(source, size, &options.confirm, &path.display().to_string()).await?;

    info!(
        source = %path.display(),
        destination = %destination.display(),
        bytes = size,
        "Rotated"
    );
    Ok(Some(RotateOutcome {
        source: path.to_path_buf(),
        destination,
        extension,
        timestamp,
    }))
}

struct SourceReader<'a> {
    source: &'a dyn Source,
    offset: u64,
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Copy the first `len` bytes into a fresh file at (or next to) `destination`
/// and return where it went.
fn copy_prefix(source: &dyn Source, len: u64, destination: &Path) -> io::Result<PathBuf> {
    let mut reader = SourceReader { source, offset: 0 }.take(len);
    let mut output = create_output(destination)?;
    io::copy(&mut reader, &mut output.file)?;
    output.file.sync_all()?;
    Ok(output.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast() -> RotateOptions {
        RotateOptions {
            ext: None,
            confirm: RetryConfig::truncate_confirm().with_initial_delay(Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn test_rotate_copies_and_truncates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nohup.out");
        std::fs::write(&path, b"hello\nworld\n").unwrap();

        let outcome = rotate(&path, None, &fast()).await.unwrap().unwrap();
        assert_eq!(outcome.source, path);
        assert_eq!(outcome.extension, ".out");
        let name = outcome.destination.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("nohup_"), "{name}");
        assert!(name.ends_with(".out"), "{name}");
        assert_eq!(std::fs::read(&outcome.destination).unwrap(), b"hello\nworld\n");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_rotate_extension_override() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        std::fs::write(&path, b"x").unwrap();

        let outcome = rotate(&path, None, &fast().with_ext(".bak")).await.unwrap().unwrap();
        assert_eq!(outcome.extension, ".bak");
        assert!(outcome.destination.to_string_lossy().ends_with(".bak"));
    }

    #[tokio::test]
    async fn test_rotate_directory_is_noop() {
        let tmp = TempDir::new().unwrap();
        assert!(rotate(tmp.path(), None, &fast()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_predicate_veto() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("small.log");
        std::fs::write(&path, b"tiny").unwrap();

        let big_only = |meta: &Metadata| meta.len() > 1024;
        assert!(rotate(&path, Some(&big_only), &fast()).await.unwrap().is_none());
        assert_eq!(std::fs::read(&path).unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn test_rotate_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = rotate(&tmp.path().join("missing.log"), None, &fast()).await.unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }
}
