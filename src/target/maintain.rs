//! Rotate-mode maintenance: renew, gzip the closed output, prune archives.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use super::{Counters, Phase, Target};
use crate::error::{Error, Result};

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintainReport {
    /// Archive written for the closed output.
    pub archive: Option<PathBuf>,
    /// Output now receiving bytes.
    pub current: Option<PathBuf>,
    /// Archives deleted by retention.
    pub pruned: Vec<PathBuf>,
}

impl Target {
    /// Renew the output, archive the closed one and prune old archives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaintenanceInProgress`] if a pass is already running,
    /// and renewal or archive-write failures. Retention failures are logged
    /// and swallowed.
    pub async fn maintain(&self, now: DateTime<Utc>) -> Result<MaintainReport> {
        let _pass = self.begin_pass(now, Phase::Maintaining)?;
        info!(target_id = %self.id, path = %self.filepath.display(), "Maintenance begins");

        let renewal = {
            let mut state = self.state.lock().await;
            self.renew_locked(&mut state, now).await?
        };
        let mut report = MaintainReport {
            current: Some(renewal.current),
            ..MaintainReport::default()
        };
        let Some(previous) = renewal.previous else {
            return Ok(report);
        };

        let archive = {
            let state = self.state.lock().await;
            self.settings.policy.archive_path_for(&self.view(&state), &previous)
        };
        let (src, dst) = (previous.clone(), archive.clone());
        tokio::task::spawn_blocking(move || compress_output(&src, &dst))
            .await?
            .map_err(|e| Error::io_at("archive", &previous, e))?;
        Counters::add(&self.counters.archives_written, 1);
        debug!(target_id = %self.id, archive = %archive.display(), "Archive written");
        report.archive = Some(archive);

        report.pruned = self.prune();
        Ok(report)
    }

    /// Archive names of this target, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the IO error from listing the directory.
    pub fn list(&self) -> Result<Vec<String>> {
        let view = self.static_view();
        let directory = self.settings.policy.directory_of(&view);
        let entries =
            std::fs::read_dir(&directory).map_err(|e| Error::io_at("list", &directory, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| self.settings.policy.is_archive(&view, name))
            .collect();
        names.sort_by(|a, b| self.settings.policy.archive_sort_order(a, b));
        Ok(names)
    }

    fn prune(&self) -> Vec<PathBuf> {
        let names = match self.list() {
            Ok(names) => names,
            Err(e) => {
                warn!(target_id = %self.id, error = %e, "Listing archives failed");
                return Vec::new();
            },
        };
        let stock = self.settings.stock;
        if names.len() <= stock {
            return Vec::new();
        }

        let directory = self.settings.policy.directory_of(&self.static_view());
        let excess = names.len() - stock;
        let mut pruned = Vec::with_capacity(excess);
        for name in names.into_iter().take(excess) {
            let path = directory.join(&name);
            match std::fs::remove_file(&path) {
                Ok(()) => pruned.push(path),
                Err(e) => debug!(target_id = %self.id, archive = %name, error = %e, "Prune failed"),
            }
        }
        Counters::add(&self.counters.archives_pruned, pruned.len() as u64);
        if !pruned.is_empty() {
            info!(target_id = %self.id, count = pruned.len(), stock, "Pruned archives");
        }
        pruned
    }

    /// View without the mutable timestamps, for naming lookups outside a
    /// check.
    fn static_view(&self) -> crate::naming::TargetView<'_> {
        crate::naming::TargetView {
            filepath: &self.filepath,
            action: self.settings.action,
            span: self.settings.span,
            cap: self.settings.cap,
            last_checked_at: self.born_at,
            last_rotated_at: self.born_at,
        }
    }
}

/// Gzip `output` into `archive` through a temporary file, then remove
/// `output`.
pub(crate) fn compress_output(output: &Path, archive: &Path) -> io::Result<u64> {
    let mut tmp = archive.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let _ = std::fs::remove_file(&tmp);

    let result = (|| {
        let mut reader = BufReader::new(File::open(output)?);
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let writer = encoder.finish()?;
        writer.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
        std::fs::rename(&tmp, archive)?;
        std::fs::metadata(archive).map(|m| m.len())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
        return result;
    }

    std::fs::remove_file(output)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_compress_output_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("app.261017_090000.log");
        let archive = tmp.path().join("app.261017_090000.gz");
        std::fs::write(&output, b"line one\nline two\n").unwrap();

        let size = compress_output(&output, &archive).unwrap();
        assert!(size > 0);
        assert!(!output.exists());
        assert!(!tmp.path().join("app.261017_090000.gz.tmp").exists());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&archive).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "line one\nline two\n");
    }

    #[test]
    fn test_compress_missing_output_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("gone.gz");
        assert!(compress_output(&tmp.path().join("gone.log"), &archive).is_err());
        assert!(!archive.exists());
    }
}
