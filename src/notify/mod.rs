//! Notifications: rotation notices and scheduled disk-space reports.
//!
//! Delivery goes through the [`Notifier`] capability. Nothing in the engine
//! depends on delivery succeeding: [`deliver`] logs and swallows every error.

mod disk;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, Local, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use disk::{DiskSampler, DiskUsage, StaticSampler, SysinfoSampler};

use crate::error::{Error, Result};
use crate::reliability::{RetryConfig, is_retryable_status, retry_async};

/// Sends a subject and body somewhere.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Notify`] when delivery failed.
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Deliver a message, logging (never returning) any failure.
pub async fn deliver(notifier: &dyn Notifier, subject: &str, body: &str) {
    match notifier.send(subject, body).await {
        Ok(()) => debug!(subject = %subject, "Notification sent"),
        Err(e) => warn!(subject = %subject, error = %e, "Notification failed"),
    }
}

/// Drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _subject: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}

/// Records the message it would have mailed in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    from: Vec<String>,
    to: Vec<String>,
}

impl LogNotifier {
    pub fn new(from: Vec<String>, to: Vec<String>) -> Self {
        Self { from, to }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        info!(
            from = ?self.from,
            to = ?self.to,
            subject = %subject,
            body = %body,
            "Report (no mail transport configured)"
        );
        Ok(())
    }
}

/// Which transport a report uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    Http,
    Mailer,
}

/// The `report` option record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportOptions {
    pub reporter: Option<ReporterKind>,
    /// Mail server address; implies the mailer when `reporter` is unset.
    pub server: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(alias = "hostname")]
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub from: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
    /// Daily report time, `HH:MM` local.
    pub time: Option<String>,
    /// Days between disk reports.
    pub span: Option<u32>,
}

impl ReportOptions {
    /// Whether any transport is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.reporter.is_some() || self.server.is_some()
    }

    /// Transport to use, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ReporterKind> {
        match (self.reporter, &self.server) {
            (Some(kind), _) => Some(kind),
            (None, Some(_)) => Some(ReporterKind::Mailer),
            (None, None) => None,
        }
    }
}

/// Build the notifier described by `options`.
///
/// An unconfigured report yields [`NoopNotifier`]; a mailer yields
/// [`LogNotifier`]. An HTTP reporter that cannot be built is logged and
/// replaced by a [`LogNotifier`].
pub fn build_notifier(options: Option<&ReportOptions>) -> Arc<dyn Notifier> {
    let Some(options) = options else {
        return Arc::new(NoopNotifier);
    };
    match options.kind() {
        None => Arc::new(NoopNotifier),
        Some(ReporterKind::Mailer) => Arc::new(LogNotifier::new(options.from.clone(), options.to.clone())),
        Some(ReporterKind::Http) => match HttpNotifier::from_options(options) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                warn!(error = %e, "Reporter is disabled, falling back to log output");
                Arc::new(LogNotifier::new(options.from.clone(), options.to.clone()))
            },
        },
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    subject: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    from: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    to: &'a [String],
}

fn is_empty(list: &&[String]) -> bool {
    list.is_empty()
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    message: Message<'a>,
    body: &'a str,
}

/// Posts `{message, body}` as JSON to a fixed endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    headers: BTreeMap<String, String>,
    from: Vec<String>,
    to: Vec<String>,
    retry: RetryConfig,
}

impl fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("url", &self.url)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl HttpNotifier {
    /// Request timeout per attempt.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Build from report options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no host is set, the method is not a
    /// valid HTTP method, or the client cannot be created.
    pub fn from_options(options: &ReportOptions) -> Result<Self> {
        let host = options
            .host
            .as_deref()
            .ok_or_else(|| Error::config("http reporter needs a host"))?;
        let scheme = if options.secure { "https" } else { "http" };
        let port = options.port.unwrap_or(80);
        let path = options.path.as_deref().unwrap_or("/report");
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let method = options.method.as_deref().unwrap_or("POST");
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::config(format!("invalid report method '{method}': {e}")))?;
        let headers = options.headers.clone().unwrap_or_else(|| {
            BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
        });

        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to create http client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{scheme}://{host}:{port}{path}"),
            method,
            headers,
            from: options.from.clone(),
            to: options.to.clone(),
            retry: RetryConfig::network(),
        })
    }

    async fn send_once(&self, body: &[u8]) -> std::result::Result<(), SendError> {
        let mut request = self.client.request(self.method.clone(), &self.url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| SendError {
                retryable: e.is_timeout() || e.is_connect(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(SendError {
            retryable: is_retryable_status(status.as_u16()),
            message: format!("report endpoint returned {status}"),
        })
    }
}

#[derive(Debug)]
struct SendError {
    retryable: bool,
    message: String,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let payload = Payload {
            message: Message {
                subject,
                from: &self.from,
                to: &self.to,
            },
            body,
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| Error::Notify(e.to_string()))?;

        retry_async(
            &self.retry,
            "report",
            || self.send_once(&bytes),
            |e| e.retryable,
        )
        .await
        .map_err(|e| Error::Notify(e.message))
    }
}

/// When scheduled disk reports fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    /// Local time of day.
    pub at: NaiveTime,
    /// Days between reports.
    pub span_days: u32,
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self {
            at: NaiveTime::MIN,
            span_days: 1,
        }
    }
}

impl ReportSchedule {
    /// Parse `time` (`HH:MM`, missing parts are zero) and `span` from the
    /// report options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed time or a zero span.
    pub fn from_options(options: &ReportOptions) -> Result<Self> {
        let at = match options.time.as_deref() {
            Some(time) => parse_time_of_day(time)?,
            None => NaiveTime::MIN,
        };
        let span_days = options.span.unwrap_or(1);
        if span_days == 0 {
            return Err(Error::config("report span must be at least one day"));
        }
        Ok(Self { at, span_days })
    }

    /// The report instant following one sent at `last`.
    #[must_use]
    pub fn next_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        let date = last.with_timezone(&Local).date_naive() + Days::new(u64::from(self.span_days));
        let naive = date.and_time(self.at);
        naive
            .and_local_timezone(Local)
            .earliest()
            .map_or_else(|| naive.and_utc(), |t| t.with_timezone(&Utc))
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let mut parts = s.trim().splitn(2, ':');
    let mut field = |name: &str| -> Result<u32> {
        match parts.next().map(str::trim) {
            None | Some("") => Ok(0),
            Some(p) => p
                .parse()
                .map_err(|_| Error::config(format!("invalid report {name} in '{s}'"))),
        }
    };
    let hour = field("hour")?;
    let minute = field("minute")?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| Error::config(format!("report time out of range: '{s}'")))
}

/// Numbered report messages, shared by all targets of a registry.
pub struct Reports {
    disk_count: AtomicU64,
    rotate_count: AtomicU64,
    hostname: String,
    sampler: Arc<dyn DiskSampler>,
}

impl fmt::Debug for Reports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reports")
            .field("disk_count", &self.disk_count)
            .field("rotate_count", &self.rotate_count)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl Reports {
    /// Create counters using the machine's host name.
    pub fn new(sampler: Arc<dyn DiskSampler>) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        Self::with_hostname(sampler, hostname)
    }

    pub fn with_hostname(sampler: Arc<dyn DiskSampler>, hostname: impl Into<String>) -> Self {
        Self {
            disk_count: AtomicU64::new(0),
            rotate_count: AtomicU64::new(0),
            hostname: hostname.into(),
            sampler,
        }
    }

    /// Compose a disk-space report for the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the sampler's error.
    pub fn disk_notice(&self, path: &Path, now: DateTime<Utc>) -> Result<(String, String)> {
        let usage = self.sampler.sample(path)?;
        let n = self.disk_count.fetch_add(1, Ordering::SeqCst) + 1;
        let subject = format!(
            "#{n} [loglife] Disc space notify - {}% ({})",
            usage.used_percent(),
            self.hostname
        );
        let body = format!(
            "DATE  : {}\nDISK  : total={}, free={}, available={}",
            now.to_rfc2822(),
            usage.total_bytes,
            usage.free_bytes,
            usage.available_bytes
        );
        Ok((subject, body))
    }

    /// Compose a rotation notice.
    pub fn rotate_notice(
        &self,
        filepath: &Path,
        old: &Path,
        old_size: u64,
        new: &Path,
        now: DateTime<Utc>,
    ) -> (String, String) {
        let n = self.rotate_count.fetch_add(1, Ordering::SeqCst) + 1;
        let subject = format!(
            "#{n} [loglife] Rotate notify - {} ({})",
            filepath.display(),
            self.hostname
        );
        let body = format!(
            "DATE  : {}\nROTATE: {} ({old_size}byte) => {}",
            now.to_rfc2822(),
            old.display(),
            new.display()
        );
        (subject, body)
    }

    /// Disk reports composed so far.
    pub fn disk_count(&self) -> u64 {
        self.disk_count.load(Ordering::SeqCst)
    }
}
