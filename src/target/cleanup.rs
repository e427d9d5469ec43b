//! Sweep-mode cleanup: delete aged files from a directory.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tracing::{debug, info};

use super::{Phase, SweepSettings, Target};
use crate::error::{Error, Result};

/// What one cleanup pass decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files handed to deletion.
    pub removed: Vec<PathBuf>,
    /// Regular files the normalizer rejected.
    pub skipped: usize,
    /// Candidates that were young enough to keep.
    pub kept: usize,
}

impl Target {
    /// Sweep the configured directory.
    ///
    /// Listing is synchronous; each deletion runs in the background and is
    /// not awaited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaintenanceInProgress`] if a pass is already running,
    /// [`Error::Config`] if the target has no sweep directory, or the IO
    /// error from listing it.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let _pass = self.begin_pass(now, Phase::Cleaning)?;
        info!(target_id = %self.id, "Cleanup begins");
        let sweep = self
            .settings
            .sweep
            .as_ref()
            .ok_or_else(|| Error::config(format!("'{}' has no sweep directory", self.id)))?;

        let report = plan_sweep(sweep, self.settings.span, now)?;
        for path in &report.removed {
            info!(target_id = %self.id, file = %path.display(), "Remove on cleanup");
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!(file = %path.display(), error = %e, "Cleanup removal failed");
                }
            });
        }

        self.state.lock().await.last_rotated_at = now;
        Ok(report)
    }
}

/// Decide which regular files in the sweep directory are due for deletion.
///
/// # Errors
///
/// Returns the IO error from listing the directory.
pub(crate) fn plan_sweep(sweep: &SweepSettings, span: Duration, now: DateTime<Utc>) -> Result<CleanupReport> {
    let span = chrono::Duration::from_std(span).unwrap_or(chrono::Duration::MAX);
    let threshold = now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let entries = std::fs::read_dir(&sweep.directory)
        .map_err(|e| Error::io_at("sweep", &sweep.directory, e))?;

    let mut report = CleanupReport::default();
    for entry in entries.filter_map(std::result::Result::ok) {
        let path = entry.path();
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let token = match &sweep.normalize {
            Some(normalize) => normalize(&name),
            None => Some(name),
        };
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            report.skipped += 1;
            continue;
        };

        let stamp = match sweep.time_position {
            Some(position) if position.from > 0 => {
                embedded_date(&token, position.from).and_then(local_midnight)
            },
            _ => meta.modified().ok().map(DateTime::<Utc>::from),
        };
        match stamp {
            Some(stamp) if stamp >= threshold => report.kept += 1,
            _ => report.removed.push(path),
        }
    }
    report.removed.sort();
    Ok(report)
}

/// Parse the date embedded in `token` from character offset `from`.
///
/// Eight characters carry a four-digit year; otherwise the first two digits
/// are a year after 2000. Month and day are always the last four characters.
pub(crate) fn embedded_date(token: &str, from: usize) -> Option<NaiveDate> {
    let digits: Vec<char> = token.chars().skip(from).collect();
    let len = digits.len();
    if len < 6 {
        return None;
    }
    let number = |range: std::ops::Range<usize>| -> Option<u32> {
        let part: String = digits[range].iter().collect();
        if part.chars().all(|c| c.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    };
    let year = if len == 8 {
        i32::try_from(number(0..4)?).ok()?
    } else {
        2000 + i32::try_from(number(0..2)?).ok()?
    };
    let month = number(len - 4..len - 2)?;
    let day = number(len - 2..len)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn local_midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(
        naive
            .and_local_timezone(Local)
            .earliest()
            .map_or_else(|| naive.and_utc(), |t| t.with_timezone(&Utc)),
    )
}
