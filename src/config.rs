//! Configuration file for the `loglife` host.
//!
//! This module loads and validates a TOML file describing which targets to
//! register and how the scheduler runs:
//!
//! - [`LogLifeConfig`] - Root configuration struct
//! - [`OptionsConfig`] - Option record shared by `[defaults]` and each target
//! - [`TargetConfig`] - One `[[targets]]` entry
//!
//! Sizes and durations accept raw numbers (bytes, milliseconds) or unit
//! strings such as `"100Mb"` and `"4w"`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::notify::ReportOptions;
use crate::scheduler::{DEFAULT_INTERVAL, DEFAULT_STALL_TIMEOUT};
use crate::target::{Action, Normalizer, TargetOptions, TargetSpec, TimePosition};
use crate::units::Quantity;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// loglife.toml configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogLifeConfig {
    /// Scheduler tick interval.
    #[serde(default)]
    pub interval: Option<Quantity>,
    /// Scheduler fail-stop threshold.
    #[serde(default)]
    pub stall_timeout: Option<Quantity>,
    #[serde(default)]
    pub defaults: OptionsConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Options as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionsConfig {
    pub span: Option<Quantity>,
    pub cap: Option<Quantity>,
    pub stock: Option<usize>,
    pub directory: Option<PathBuf>,
    /// Glob over file names; only matching files are swept.
    pub include: Option<String>,
    pub time_position: Option<TimePosition>,
    pub report: Option<ReportOptions>,
    pub action: Option<Action>,
    pub symlink: Option<bool>,
    pub long_year: Option<bool>,
    pub utc_offset: Option<i32>,
    pub relay_ceiling: Option<Quantity>,
    pub copy_interval: Option<Quantity>,
    pub chunk_size: Option<usize>,
}

/// One `[[targets]]` entry: a plain `path`, or an `id` with overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    pub path: Option<String>,
    pub id: Option<String>,
    #[serde(flatten)]
    pub options: OptionsConfig,
}

impl LogLifeConfig {
    /// Load configuration from loglife.toml in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if loglife.toml cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from("loglife.toml")
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields are unknown or have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: LogLifeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Tick interval, or the default.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is not a duration.
    pub fn interval(&self) -> Result<Duration> {
        parse_duration_or(self.interval.as_ref(), "interval", DEFAULT_INTERVAL)
    }

    /// Stall threshold, or the default.
    ///
    /// # Errors
    ///
    /// Returns an error if `stall_timeout` is not a duration.
    pub fn stall_timeout(&self) -> Result<Duration> {
        parse_duration_or(self.stall_timeout.as_ref(), "stall_timeout", DEFAULT_STALL_TIMEOUT)
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails with one or more errors:
    /// - Unparseable intervals, sizes or durations
    /// - Targets with neither or both of `path` and `id`
    /// - Sweep targets without a directory, invalid globs, bad report times
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Scheduler
        match self.interval() {
            Ok(interval) if interval.is_zero() => {
                errors.push("interval must be greater than zero".to_string());
            },
            Ok(interval) if interval < Duration::from_secs(1) => warnings.push(format!(
                "interval {interval:?} is below one second\n  \
                 Recommendation: 10sec (default) is enough for most files"
            )),
            Ok(_) => {},
            Err(e) => errors.push(e.to_string()),
        }
        if let Err(e) = self.stall_timeout() {
            errors.push(e.to_string());
        }

        // 2. Targets
        if self.targets.is_empty() {
            warnings.push("No [[targets]] configured; the scheduler will idle".to_string());
        }
        let defaults = match self.defaults.to_options() {
            Ok(options) => Some(options),
            Err(e) => {
                errors.push(format!("[defaults]: {e:#}"));
                None
            },
        };
        for (index, target) in self.targets.iter().enumerate() {
            let label = target.label(index);
            match (&target.path, &target.id) {
                (None, None) => errors.push(format!("{label}: set either `path` or `id`")),
                (Some(_), Some(_)) => errors.push(format!("{label}: `path` and `id` are exclusive")),
                _ => {},
            }
            if target.path.is_some() && target.options.directory.is_some() {
                errors.push(format!("{label}: `directory` requires an `id`, not a `path`"));
            }

            let Some(defaults) = &defaults else { continue };
            let resolved = target
                .options
                .to_options()
                .and_then(|options| options.merged_over(defaults).resolve().map_err(Into::into));
            match resolved {
                Ok(settings) => {
                    if let Some(sweep) = &settings.sweep
                        && !sweep.directory.is_dir()
                    {
                        warnings.push(format!(
                            "{label}: sweep directory does not exist: {}",
                            sweep.directory.display()
                        ));
                    }
                    if settings.action == Action::Rotate && settings.stock == 0 {
                        warnings.push(format!(
                            "{label}: stock = 0 deletes every archive right after it is written"
                        ));
                    }
                },
                Err(e) => errors.push(format!("{label}: {e:#}")),
            }
        }

        // Return errors if any
        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }

    /// Shared options and registration specifiers.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid globs or targets without `path`/`id`.
    pub fn registration(&self) -> Result<(TargetOptions, Vec<TargetSpec>)> {
        let defaults = self.defaults.to_options().context("Invalid [defaults]")?;
        let specs = self
            .targets
            .iter()
            .enumerate()
            .map(|(index, target)| target.to_spec(index))
            .collect::<Result<Vec<_>>>()?;
        Ok((defaults, specs))
    }
}

impl OptionsConfig {
    /// Convert to registration options.
    ///
    /// # Errors
    ///
    /// Returns an error if `include` is not a valid glob.
    pub fn to_options(&self) -> Result<TargetOptions> {
        let normalize = self.include.as_deref().map(glob_normalizer).transpose()?;
        Ok(TargetOptions {
            span: self.span.clone(),
            cap: self.cap.clone(),
            stock: self.stock,
            directory: self.directory.clone(),
            normalize,
            time_position: self.time_position,
            report: self.report.clone(),
            action: self.action,
            symlink: self.symlink,
            long_year: self.long_year,
            utc_offset: self.utc_offset,
            relay_ceiling: self.relay_ceiling.clone(),
            copy_interval: self.copy_interval.clone(),
            chunk_size: self.chunk_size,
            ..TargetOptions::default()
        })
    }
}

impl TargetConfig {
    fn label(&self, index: usize) -> String {
        match (&self.id, &self.path) {
            (Some(id), _) => format!("targets[{index}] ({id})"),
            (None, Some(path)) => format!("targets[{index}] ({path})"),
            (None, None) => format!("targets[{index}]"),
        }
    }

    fn to_spec(&self, index: usize) -> Result<TargetSpec> {
        let options = self
            .options
            .to_options()
            .with_context(|| format!("Invalid {}", self.label(index)))?;
        match (&self.path, &self.id) {
            (Some(path), None) => Ok(TargetSpec::record(path.clone(), options)),
            (None, Some(id)) => Ok(TargetSpec::record(id.clone(), options)),
            _ => anyhow::bail!("{}: set exactly one of `path` or `id`", self.label(index)),
        }
    }
}

/// Normalizer that keeps file names matching `pattern`.
///
/// The token is the name without its last extension, so `app.261017.log`
/// yields `app.261017` and `time_position = { from = 4 }` finds the date.
///
/// # Errors
///
/// Returns an error if `pattern` is not a valid glob.
pub fn glob_normalizer(pattern: &str) -> Result<Normalizer> {
    let pattern = glob::Pattern::new(pattern)
        .with_context(|| format!("Invalid include pattern: {pattern}"))?;
    Ok(Arc::new(move |name: &str| {
        if !pattern.matches(name) {
            return None;
        }
        let token = match name.rfind('.') {
            Some(dot) if dot > 0 => &name[..dot],
            _ => name,
        };
        Some(token.to_string())
    }))
}

fn parse_duration_or(value: Option<&Quantity>, name: &str, default: Duration) -> Result<Duration> {
    value
        .map(|q| q.to_duration().with_context(|| format!("Invalid {name}")))
        .transpose()
        .map(|d| d.unwrap_or(default))
}
