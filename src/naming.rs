//! Archive naming policy.
//!
//! Every target consults a [`NamingPolicy`] to locate its directory, derive
//! output and archive names, decide whether to kick, and order archives for
//! retention. All methods have default implementations that depend only on
//! the [`TargetView`] they are given, so a custom policy can override just
//! the pieces it cares about.
//!
//! Default layout for `/var/log/app.log`:
//!
//! ```text
//! /var/log/app.261017_093000.log   live output
//! /var/log/app.261017_083000.gz    archive
//! ```

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Utc};

use crate::target::Action;

/// Default suffix for compressed archives.
pub const ARCHIVE_EXTENSION: &str = ".gz";

/// Extension used for live output files.
pub const OUTPUT_EXTENSION: &str = "log";

/// Read-only view of the target fields a policy may depend on.
#[derive(Debug, Clone, Copy)]
pub struct TargetView<'a> {
    pub filepath: &'a Path,
    pub action: Action,
    pub span: Duration,
    pub cap: u64,
    pub last_checked_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
}

/// Naming, kick and ordering rules for a target.
pub trait NamingPolicy: Send + Sync + fmt::Debug + 'static {
    /// Format the timestamp embedded in output names.
    fn format_timestamp(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&Local).format("%y%m%d_%H%M%S").to_string()
    }

    /// Parent directory of the target path (`.` if none).
    fn directory_of(&self, view: &TargetView<'_>) -> PathBuf {
        match view.filepath.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Target path without its trailing extension.
    fn stem_of(&self, view: &TargetView<'_>) -> PathBuf {
        let stem = view
            .filepath
            .file_stem()
            .map_or_else(OsString::new, ToOwned::to_owned);
        match view.filepath.parent() {
            Some(parent) => parent.join(stem),
            None => PathBuf::from(stem),
        }
    }

    /// Suffix of compressed archives, including the leading dot.
    fn archive_extension(&self, _view: &TargetView<'_>) -> String {
        ARCHIVE_EXTENSION.to_string()
    }

    /// `<stem>.<timestamp>.<ext>`
    fn output_name_for(&self, view: &TargetView<'_>, time: DateTime<Utc>, ext: &str) -> PathBuf {
        let mut name = self.stem_of(view).into_os_string();
        name.push(".");
        name.push(self.format_timestamp(time));
        name.push(".");
        name.push(ext);
        PathBuf::from(name)
    }

    /// Archive path for a closed output: its last extension swapped for the
    /// archive extension.
    fn archive_path_for(&self, view: &TargetView<'_>, output: &Path) -> PathBuf {
        let mut name = output.with_extension("").into_os_string();
        name.push(self.archive_extension(view));
        PathBuf::from(name)
    }

    /// Whether a file name in [`directory_of`](Self::directory_of) is one of
    /// this target's archives.
    fn is_archive(&self, view: &TargetView<'_>, file_name: &str) -> bool {
        let stem = self.stem_of(view);
        let Some(head) = stem.file_name().and_then(|s| s.to_str()) else {
            return false;
        };
        file_name.len() > head.len()
            && file_name.starts_with(head)
            && file_name[head.len()..].starts_with('.')
            && file_name.ends_with(&self.archive_extension(view))
    }

    /// Decide whether maintenance (or cleanup) should run at `time`.
    ///
    /// Kicks when more than `span` has passed since the previous check, so a
    /// target checked more often than its span only rotates on size. Rotate
    /// targets also kick when the live output has grown past `cap`; sweep
    /// targets never size-trigger. `output_size` is only consulted when
    /// needed.
    fn should_kick(
        &self,
        view: &TargetView<'_>,
        time: DateTime<Utc>,
        output_size: &dyn Fn() -> Option<u64>,
    ) -> bool {
        let elapsed = time.signed_duration_since(view.last_checked_at);
        if chrono::Duration::from_std(view.span).is_ok_and(|span| elapsed > span) {
            return true;
        }
        match view.action {
            Action::Sweep => false,
            Action::Rotate => output_size().is_some_and(|size| size > view.cap),
        }
    }

    /// Ordering used for retention: oldest first.
    fn archive_sort_order(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// Digits used for the year in output timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearDigits {
    /// `yyMMdd_HHmmss`
    #[default]
    Two,
    /// `yyyyMMdd_HHmmss`
    Four,
}

/// The shared default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamingPolicy {
    year: YearDigits,
    offset: Option<FixedOffset>,
}

impl DefaultNamingPolicy {
    /// Two-digit years in local time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            year: YearDigits::Two,
            offset: None,
        }
    }

    /// Set the number of year digits.
    #[must_use]
    pub const fn with_year_digits(mut self, year: YearDigits) -> Self {
        self.year = year;
        self
    }

    /// Format timestamps at a fixed UTC offset instead of local time.
    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    fn pattern(&self) -> &'static str {
        match self.year {
            YearDigits::Two => "%y%m%d_%H%M%S",
            YearDigits::Four => "%Y%m%d_%H%M%S",
        }
    }
}

impl NamingPolicy for DefaultNamingPolicy {
    fn format_timestamp(&self, time: DateTime<Utc>) -> String {
        match self.offset {
            Some(offset) => time.with_timezone(&offset).format(self.pattern()).to_string(),
            None => time.with_timezone(&Local).format(self.pattern()).to_string(),
        }
    }
}
