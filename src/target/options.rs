//! Registration options and their resolved form.
//!
//! [`TargetOptions`] is the loose record callers hand to the registry: every
//! field is optional so a per-target record can override a shared record
//! field by field. [`TargetOptions::resolve`] turns the merged record into
//! [`Settings`], parsing unit strings and filling defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::{DefaultNamingPolicy, NamingPolicy, YearDigits};
use crate::notify::{Notifier, ReportOptions, ReportSchedule};
use crate::reliability::RetryConfig;
use crate::units::Quantity;

/// Default maximum age before a forced rotation: four weeks.
pub const DEFAULT_SPAN: Duration = Duration::from_secs(28 * 24 * 60 * 60);

/// Default size trigger: 100 MiB.
pub const DEFAULT_CAP: u64 = 100 * 1024 * 1024;

/// Default number of archives kept.
pub const DEFAULT_STOCK: usize = 5;

/// Default bound on the unrelayed tail flushed per renewal: 10 MiB.
pub const DEFAULT_RELAY_CEILING: u64 = 10 * 1024 * 1024;

/// Default tail-copy period.
pub const DEFAULT_COPY_INTERVAL: Duration = Duration::from_secs(3);

/// Default tail-copy chunk: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Specifier that maps to the process' standard output.
pub const STDOUT_DESIGNATOR: &str = "process.stdout";

/// Specifier that maps to the process' standard error.
pub const STDERR_DESIGNATOR: &str = "process.stderr";

/// What a target does when it kicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Renew the output, archive the old one, prune archives.
    Rotate,
    /// Delete aged files from a directory.
    Sweep,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotate => f.write_str("rotate"),
            Self::Sweep => f.write_str("sweep"),
        }
    }
}

/// One of the process' standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    /// The registration designator for this stream.
    #[must_use]
    pub const fn designator(self) -> &'static str {
        match self {
            Self::Stdout => STDOUT_DESIGNATOR,
            Self::Stderr => STDERR_DESIGNATOR,
        }
    }

    /// Parse a registration designator.
    #[must_use]
    pub fn from_designator(s: &str) -> Option<Self> {
        match s {
            STDOUT_DESIGNATOR => Some(Self::Stdout),
            STDERR_DESIGNATOR => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Where a target's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A file other processes append to.
    File,
    /// A live standard stream of this process.
    ProcessStream(StdStream),
}

/// Caller-supplied filter for sweep candidates.
///
/// Returns the token to parse a date from, or `None` to leave the file alone.
pub type Normalizer = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where the date sits in a normalized sweep token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePosition {
    /// Character offset where the date starts. Zero counts as unset: the
    /// file's modification time is used instead.
    pub from: usize,
}

/// One registration specifier.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    /// A plain path (or a process-stream designator).
    Path(PathBuf),
    /// A record with an explicit id and its own option overrides.
    Record { id: String, options: TargetOptions },
}

impl TargetSpec {
    /// A plain path specifier.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// A record specifier.
    pub fn record(id: impl Into<String>, options: TargetOptions) -> Self {
        Self::Record {
            id: id.into(),
            options,
        }
    }

    /// Identifier the registry stores this target under.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Record { id, .. } => id.clone(),
        }
    }
}

impl From<&str> for TargetSpec {
    fn from(s: &str) -> Self {
        Self::Path(PathBuf::from(s))
    }
}

impl From<PathBuf> for TargetSpec {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl From<&Path> for TargetSpec {
    fn from(p: &Path) -> Self {
        Self::Path(p.to_path_buf())
    }
}

/// Options accepted at registration. Unset fields fall back to the shared
/// record and then to built-in defaults.
#[derive(Clone, Default)]
pub struct TargetOptions {
    pub span: Option<Quantity>,
    pub cap: Option<Quantity>,
    pub stock: Option<usize>,
    /// Sweep this directory instead of rotating a file.
    pub directory: Option<PathBuf>,
    pub normalize: Option<Normalizer>,
    pub time_position: Option<TimePosition>,
    pub report: Option<ReportOptions>,
    /// Explicit notifier; takes precedence over one built from `report`.
    pub notifier: Option<Arc<dyn Notifier>>,
    pub action: Option<Action>,
    /// Keep `filepath` as a symlink to the live output.
    pub symlink: Option<bool>,
    pub long_year: Option<bool>,
    /// Fixed UTC offset in seconds for output names.
    pub utc_offset: Option<i32>,
    pub relay_ceiling: Option<Quantity>,
    pub copy_interval: Option<Quantity>,
    pub chunk_size: Option<usize>,
    pub confirm: Option<RetryConfig>,
    pub policy: Option<Arc<dyn NamingPolicy>>,
}

impl fmt::Debug for TargetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetOptions")
            .field("span", &self.span)
            .field("cap", &self.cap)
            .field("stock", &self.stock)
            .field("directory", &self.directory)
            .field("normalize", &self.normalize.as_ref().map(|_| "<fn>"))
            .field("time_position", &self.time_position)
            .field("report", &self.report)
            .field("notifier", &self.notifier.as_ref().map(|_| "<notifier>"))
            .field("action", &self.action)
            .field("symlink", &self.symlink)
            .field("long_year", &self.long_year)
            .field("utc_offset", &self.utc_offset)
            .field("relay_ceiling", &self.relay_ceiling)
            .field("copy_interval", &self.copy_interval)
            .field("chunk_size", &self.chunk_size)
            .field("confirm", &self.confirm)
            .field("policy", &self.policy)
            .finish()
    }
}

macro_rules! or_default {
    ($self:ident, $defaults:ident, $($field:ident),+ $(,)?) => {
        TargetOptions {
            $($field: $self.$field.clone().or_else(|| $defaults.$field.clone()),)+
        }
    };
}

impl TargetOptions {
    /// Fill unset fields from `defaults`.
    #[must_use]
    pub fn merged_over(&self, defaults: &Self) -> Self {
        or_default!(
            self,
            defaults,
            span,
            cap,
            stock,
            directory,
            normalize,
            time_position,
            report,
            notifier,
            action,
            symlink,
            long_year,
            utc_offset,
            relay_ceiling,
            copy_interval,
            chunk_size,
            confirm,
            policy,
        )
    }

    /// The action to take: explicit, or inferred from `directory`.
    #[must_use]
    pub fn action(&self) -> Action {
        self.action.unwrap_or(if self.directory.is_some() {
            Action::Sweep
        } else {
            Action::Rotate
        })
    }

    /// Parse and default every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable quantities, a sweep without a
    /// directory, a zero chunk size, an invalid report schedule, or an
    /// out-of-range UTC offset.
    pub fn resolve(&self) -> Result<Settings> {
        let span = quantity(&self.span, "span", Quantity::to_duration)?.unwrap_or(DEFAULT_SPAN);
        let cap = quantity(&self.cap, "cap", Quantity::to_bytes)?.unwrap_or(DEFAULT_CAP);
        let relay_ceiling = quantity(&self.relay_ceiling, "relay_ceiling", Quantity::to_bytes)?
            .unwrap_or(DEFAULT_RELAY_CEILING);
        let copy_interval = quantity(&self.copy_interval, "copy_interval", Quantity::to_duration)?
            .unwrap_or(DEFAULT_COPY_INTERVAL);
        if copy_interval.is_zero() {
            return Err(Error::config("copy_interval must be greater than zero"));
        }
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than zero"));
        }

        let action = self.action();
        let sweep = match action {
            Action::Sweep => {
                let directory = self
                    .directory
                    .clone()
                    .ok_or_else(|| Error::config("sweep targets need a directory"))?;
                Some(SweepSettings {
                    directory,
                    normalize: self.normalize.clone(),
                    time_position: self.time_position,
                })
            },
            Action::Rotate => None,
        };

        let schedule = self
            .report
            .as_ref()
            .map(ReportSchedule::from_options)
            .transpose()?;

        Ok(Settings {
            action,
            span,
            cap,
            stock: self.stock.unwrap_or(DEFAULT_STOCK),
            relay_ceiling,
            copy_interval,
            chunk_size,
            confirm: self.confirm.clone().unwrap_or_else(RetryConfig::truncate_confirm),
            symlink: self.symlink.unwrap_or(false),
            sweep,
            schedule,
            policy: self.naming_policy()?,
        })
    }

    fn naming_policy(&self) -> Result<Arc<dyn NamingPolicy>> {
        if let Some(policy) = &self.policy {
            return Ok(Arc::clone(policy));
        }
        let mut policy = DefaultNamingPolicy::new();
        if self.long_year.unwrap_or(false) {
            policy = policy.with_year_digits(YearDigits::Four);
        }
        if let Some(secs) = self.utc_offset {
            let offset = FixedOffset::east_opt(secs)
                .ok_or_else(|| Error::config(format!("utc_offset out of range: {secs}")))?;
            policy = policy.with_offset(offset);
        }
        Ok(Arc::new(policy))
    }
}

fn quantity<T>(
    value: &Option<Quantity>,
    name: &str,
    parse: impl Fn(&Quantity) -> Result<T>,
) -> Result<Option<T>> {
    value
        .as_ref()
        .map(|q| parse(q).map_err(|e| Error::config(format!("invalid {name}: {e}"))))
        .transpose()
}

/// Sweep-mode settings.
#[derive(Clone)]
pub struct SweepSettings {
    pub directory: PathBuf,
    pub normalize: Option<Normalizer>,
    pub time_position: Option<TimePosition>,
}

impl fmt::Debug for SweepSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepSettings")
            .field("directory", &self.directory)
            .field("normalize", &self.normalize.is_some())
            .field("time_position", &self.time_position)
            .finish()
    }
}

/// Fully resolved per-target settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub action: Action,
    pub span: Duration,
    pub cap: u64,
    pub stock: usize,
    pub relay_ceiling: u64,
    pub copy_interval: Duration,
    pub chunk_size: usize,
    pub confirm: RetryConfig,
    pub symlink: bool,
    pub sweep: Option<SweepSettings>,
    pub schedule: Option<ReportSchedule>,
    pub policy: Arc<dyn NamingPolicy>,
}
