//! Rotation targets.
//!
//! A [`Target`] is one monitored file, process stream or swept directory.
//! File targets own a descriptor on their source and relay its bytes into
//! timestamped outputs; on each kick they renew the output, archive the old
//! one and prune old archives. Sweep targets delete aged files from a
//! directory instead.
//!
//! ```text
//! Opening -> Ready -> { Renewing | Maintaining | Cleaning } -> Ready -> ... -> Closed
//!        \-> Disabled
//! ```

mod cleanup;
mod maintain;
mod options;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use cleanup::CleanupReport;
pub use maintain::MaintainReport;
pub use options::{
    Action, DEFAULT_CAP, DEFAULT_CHUNK_SIZE, DEFAULT_COPY_INTERVAL, DEFAULT_RELAY_CEILING,
    DEFAULT_SPAN, DEFAULT_STOCK, Normalizer, STDERR_DESIGNATOR, STDOUT_DESIGNATOR, Settings,
    StdStream, SweepSettings, TargetKind, TargetOptions, TargetSpec, TimePosition,
};

use crate::error::{Error, Result};
use crate::naming::{OUTPUT_EXTENSION, TargetView};
use crate::notify::{Notifier, deliver};
use crate::registry::Shared;
use crate::renewal::{Copier, Relay, create_output, refresh_symlink, truncate_confirmed};

/// Lifecycle phase of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Opening,
    Ready,
    Renewing,
    Maintaining,
    Cleaning,
    /// Opening failed; nothing happens until the target is re-registered.
    Disabled(String),
    Closed,
}

/// Whether a target can do work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
    Closed,
}

/// Counters describing what a target has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub renewals: u64,
    pub archives_written: u64,
    pub archives_pruned: u64,
    /// Unrelayed bytes skipped because they exceeded the relay ceiling.
    pub dropped_bytes: u64,
    /// Renewals that skipped bytes.
    pub drop_events: u64,
    /// Truncates that could not be confirmed within the retry budget.
    pub confirm_exhausted: u64,
    /// Bytes written back to a source head by the confirm loop.
    pub recovered_bytes: u64,
    /// Checks whose kick dispatch failed.
    pub check_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    renewals: AtomicU64,
    archives_written: AtomicU64,
    archives_pruned: AtomicU64,
    dropped_bytes: AtomicU64,
    drop_events: AtomicU64,
    confirm_exhausted: AtomicU64,
    recovered_bytes: AtomicU64,
    check_failures: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TargetStats {
        TargetStats {
            renewals: self.renewals.load(Ordering::Relaxed),
            archives_written: self.archives_written.load(Ordering::Relaxed),
            archives_pruned: self.archives_pruned.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            drop_events: self.drop_events.load(Ordering::Relaxed),
            confirm_exhausted: self.confirm_exhausted.load(Ordering::Relaxed),
            recovered_bytes: self.recovered_bytes.load(Ordering::Relaxed),
            check_failures: self.check_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Control {
    phase: Phase,
    in_progress_since: Option<DateTime<Utc>>,
}

/// Marks a maintenance or cleanup pass as running until dropped.
struct PassGuard<'a> {
    control: &'a parking_lot::Mutex<Control>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.control.lock();
        control.in_progress_since = None;
        if matches!(control.phase, Phase::Maintaining | Phase::Cleaning) {
            control.phase = Phase::Ready;
        }
    }
}

struct State {
    relay: Option<Arc<Mutex<Relay>>>,
    copier: Option<Copier>,
    current_output: Option<PathBuf>,
    last_checked_at: DateTime<Utc>,
    last_rotated_at: DateTime<Utc>,
    last_notified_at: DateTime<Utc>,
}

/// Result of one stream renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renewal {
    /// Output that was closed, if one was open.
    pub previous: Option<PathBuf>,
    /// Output now receiving bytes.
    pub current: PathBuf,
}

/// One monitored path, process stream or swept directory.
pub struct Target {
    id: String,
    filepath: PathBuf,
    kind: TargetKind,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    born_at: DateTime<Utc>,
    shared: Arc<Shared>,
    control: parking_lot::Mutex<Control>,
    state: Mutex<State>,
    counters: Counters,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("filepath", &self.filepath)
            .field("kind", &self.kind)
            .field("action", &self.settings.action)
            .field("phase", &self.control.lock().phase)
            .finish_non_exhaustive()
    }
}

impl Target {
    pub(crate) fn new(
        id: String,
        filepath: PathBuf,
        kind: TargetKind,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
        shared: Arc<Shared>,
    ) -> Self {
        let born_at = shared.clock.now();
        Self {
            id,
            filepath,
            kind,
            settings,
            notifier,
            born_at,
            shared,
            control: parking_lot::Mutex::new(Control {
                phase: Phase::Opening,
                in_progress_since: None,
            }),
            state: Mutex::new(State {
                relay: None,
                copier: None,
                current_output: None,
                last_checked_at: born_at,
                last_rotated_at: born_at,
                last_notified_at: born_at,
            }),
            counters: Counters::default(),
        }
    }

    /// Acquire the descriptor and open the first output.
    ///
    /// Failure disables the target and is logged; it is never returned.
    pub(crate) async fn open(&self) {
        match self.try_open().await {
            Ok(()) => {
                self.control.lock().phase = Phase::Ready;
                info!(
                    target_id = %self.id,
                    path = %self.filepath.display(),
                    action = %self.settings.action,
                    "Planning succeeded"
                );
            },
            Err(e) => {
                self.release().await;
                let reason = e.to_string();
                error!(
                    target_id = %self.id,
                    path = %self.filepath.display(),
                    error = %reason,
                    "Planning failed, target disabled"
                );
                self.control.lock().phase = Phase::Disabled(reason);
            },
        }
    }

    async fn try_open(&self) -> Result<()> {
        if self.settings.action == Action::Sweep {
            return Ok(());
        }
        if let TargetKind::File = self.kind {
            let shared = Arc::clone(&self.shared);
            let path = self.filepath.clone();
            let source = tokio::task::spawn_blocking(move || {
                shared.cache.acquire(&path, shared.opener.as_ref())
            })
            .await?
            .map_err(|e| Error::io_at("open", &self.filepath, e))?;
            self.state.lock().await.relay = Some(Arc::new(Mutex::new(Relay::new(source))));
        }
        let now = self.shared.clock.now();
        let mut state = self.state.lock().await;
        self.renew_locked(&mut state, now).await?;
        Ok(())
    }

    /// Identifier in the registry.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Monitored path (for process streams, `<cwd>/process.<stream>.out`).
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn action(&self) -> Action {
        self.settings.action
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn born_at(&self) -> DateTime<Utc> {
        self.born_at
    }

    pub fn phase(&self) -> Phase {
        self.control.lock().phase.clone()
    }

    /// Start time of the running maintenance or cleanup pass, if any.
    pub fn in_progress_since(&self) -> Option<DateTime<Utc>> {
        self.control.lock().in_progress_since
    }

    pub fn readiness(&self) -> Readiness {
        match &self.control.lock().phase {
            Phase::Opening => Readiness::Pending,
            Phase::Disabled(reason) => Readiness::Failed(reason.clone()),
            Phase::Closed => Readiness::Closed,
            Phase::Ready | Phase::Renewing | Phase::Maintaining | Phase::Cleaning => Readiness::Ready,
        }
    }

    pub fn stats(&self) -> TargetStats {
        self.counters.snapshot()
    }

    /// Path of the live output file.
    pub async fn current_output(&self) -> Option<PathBuf> {
        self.state.lock().await.current_output.clone()
    }

    /// Bytes of the source relayed into the current output.
    pub async fn read_cursor(&self) -> Option<u64> {
        let relay = self.state.lock().await.relay.clone()?;
        let cursor = relay.lock().await.cursor;
        Some(cursor)
    }

    pub async fn last_checked_at(&self) -> DateTime<Utc> {
        self.state.lock().await.last_checked_at
    }

    pub async fn last_rotated_at(&self) -> DateTime<Utc> {
        self.state.lock().await.last_rotated_at
    }

    /// Size of the live output file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no output is open, or the IO error from
    /// reading its metadata.
    pub async fn size(&self) -> Result<u64> {
        let path = self
            .current_output()
            .await
            .ok_or_else(|| Error::NotFound(format!("live output of '{}'", self.id)))?;
        tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| Error::io_at("stat", path, e))
    }

    fn view<'a>(&'a self, state: &State) -> TargetView<'a> {
        TargetView {
            filepath: &self.filepath,
            action: self.settings.action,
            span: self.settings.span,
            cap: self.settings.cap,
            last_checked_at: state.last_checked_at,
            last_rotated_at: state.last_rotated_at,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.control.lock().phase {
            Phase::Disabled(reason) => Err(Error::target_disabled(&self.id, reason)),
            Phase::Closed => Err(Error::TargetClosed(self.id.clone())),
            _ => Ok(()),
        }
    }

    fn begin_pass(&self, now: DateTime<Utc>, phase: Phase) -> Result<PassGuard<'_>> {
        let mut control = self.control.lock();
        match &control.phase {
            Phase::Disabled(reason) => return Err(Error::target_disabled(&self.id, reason)),
            Phase::Closed => return Err(Error::TargetClosed(self.id.clone())),
            _ => {},
        }
        if let Some(since) = control.in_progress_since {
            return Err(Error::MaintenanceInProgress {
                target: self.id.clone(),
                since,
            });
        }
        control.in_progress_since = Some(now);
        control.phase = phase;
        Ok(PassGuard {
            control: &self.control,
        })
    }

    /// Swap the output file now.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is disabled or closed, or if flushing,
    /// truncating or opening the new output fails.
    pub async fn renew(&self) -> Result<Renewal> {
        self.ensure_usable()?;
        let now = self.shared.clock.now();
        let mut state = self.state.lock().await;
        self.renew_locked(&mut state, now).await
    }

    async fn renew_locked(&self, state: &mut State, now: DateTime<Utc>) -> Result<Renewal> {
        let entered = {
            let mut control = self.control.lock();
            let entered = control.phase == Phase::Ready;
            if entered {
                control.phase = Phase::Renewing;
            }
            entered
        };
        let result = match self.kind {
            TargetKind::File => self.renew_file(state, now).await,
            TargetKind::ProcessStream(stream) => self.renew_stream(state, stream, now).await,
        };
        if entered {
            let mut control = self.control.lock();
            if control.phase == Phase::Renewing {
                control.phase = Phase::Ready;
            }
        }

        let renewal = result?;
        state.current_output = Some(renewal.current.clone());
        state.last_rotated_at = now;
        Counters::add(&self.counters.renewals, 1);
        if self.settings.symlink {
            refresh_symlink(&self.filepath, &renewal.current);
        }
        if let Some(previous) = &renewal.previous {
            self.notify_rotation(previous, &renewal.current, now);
        }
        debug!(
            target_id = %self.id,
            output = %renewal.current.display(),
            "Output renewed"
        );
        Ok(renewal)
    }

    async fn renew_file(&self, state: &mut State, now: DateTime<Utc>) -> Result<Renewal> {
        if let Some(copier) = state.copier.take() {
            copier.stop().await;
        }
        let relay = state
            .relay
            .clone()
            .ok_or_else(|| Error::TargetClosed(self.id.clone()))?;
        let guard = Arc::clone(&relay).lock_owned().await;

        let ceiling = self.settings.relay_ceiling;
        let (mut guard, flushed) = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let flushed = guard.flush_and_close(ceiling, now);
            (guard, flushed)
        })
        .await?;
        let flushed = flushed.map_err(|e| Error::io_at("flush", &self.filepath, e))?;

        if flushed.dropped > 0 {
            Counters::add(&self.counters.dropped_bytes, flushed.dropped);
            Counters::add(&self.counters.drop_events, 1);
            warn!(
                target_id = %self.id,
                dropped_bytes = flushed.dropped,
                ceiling,
                "Unrelayed tail exceeded the relay ceiling, oldest bytes skipped"
            );
        }

        if flushed.previous.is_some() {
            let source = guard
                .source
                .clone()
                .ok_or_else(|| Error::TargetClosed(self.id.clone()))?;
            let outcome =
                truncate_confirmed(source, flushed.pre_size, &self.settings.confirm, &self.id).await?;
            Counters::add(&self.counters.recovered_bytes, outcome.recovered_bytes);
            if !outcome.confirmed {
                Counters::add(&self.counters.confirm_exhausted, 1);
            }
        }

        let name = self
            .settings
            .policy
            .output_name_for(&self.view(state), now, OUTPUT_EXTENSION);
        let output = tokio::task::spawn_blocking(move || create_output(&name))
            .await?
            .map_err(|e| Error::io_at("create output for", &self.filepath, e))?;
        let current = output.path.clone();
        guard.output = Some(output);
        guard.cursor = 0;
        drop(guard);

        state.copier = Some(Copier::spawn(
            relay,
            self.settings.copy_interval,
            self.settings.chunk_size,
            self.id.clone(),
        ));

        Ok(Renewal {
            previous: flushed.previous,
            current,
        })
    }

    async fn renew_stream(&self, state: &mut State, stream: StdStream, now: DateTime<Utc>) -> Result<Renewal> {
        let name = self
            .settings
            .policy
            .output_name_for(&self.view(state), now, OUTPUT_EXTENSION);
        let output = tokio::task::spawn_blocking(move || create_output(&name))
            .await?
            .map_err(|e| Error::io_at("create output for", &self.filepath, e))?;
        let current = output.path.clone();
        let previous = self
            .shared
            .sink(stream)
            .swap(output.path, output.file)
            .map(|(path, _file)| path);
        Ok(Renewal { previous, current })
    }

    fn notify_rotation(&self, previous: &Path, current: &Path, now: DateTime<Utc>) {
        let old_size = std::fs::metadata(previous).map(|m| m.len()).unwrap_or(0);
        let (subject, body) =
            self.shared
                .reports
                .rotate_notice(&self.filepath, previous, old_size, current, now);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            deliver(notifier.as_ref(), &subject, &body).await;
        });
    }

    /// The per-tick entry point.
    ///
    /// Evaluates the kick predicate and dispatches to [`maintain`] or
    /// [`cleanup`]. Failures never escape: rotate targets answer them by
    /// forcing a renewal, sweep targets skip. `first_in_tick` gates the
    /// scheduled disk report.
    ///
    /// [`maintain`]: Self::maintain
    /// [`cleanup`]: Self::cleanup
    pub async fn check(&self, now: DateTime<Utc>, first_in_tick: bool) {
        match self.readiness() {
            Readiness::Ready => {},
            other => {
                debug!(target_id = %self.id, readiness = ?other, "Skipping check");
                return;
            },
        }

        if self.should_kick(now).await {
            let result = match self.settings.action {
                Action::Rotate => self.maintain(now).await.map(drop),
                Action::Sweep => self.cleanup(now).await.map(drop),
            };
            if let Err(e) = result {
                self.recover(&e, now).await;
            }
        }

        if first_in_tick {
            self.report_if_due(now).await;
        }
        self.state.lock().await.last_checked_at = now;
    }

    async fn should_kick(&self, now: DateTime<Utc>) -> bool {
        let output_size = match self.settings.action {
            Action::Rotate => self.size().await.ok(),
            Action::Sweep => None,
        };
        let state = self.state.lock().await;
        self.settings
            .policy
            .should_kick(&self.view(&state), now, &|| output_size)
    }

    async fn recover(&self, err: &Error, now: DateTime<Utc>) {
        match self.settings.action {
            Action::Sweep => {
                if err.is_in_progress() {
                    debug!(target_id = %self.id, "Cleanup already running, skipping");
                } else {
                    Counters::add(&self.counters.check_failures, 1);
                    warn!(target_id = %self.id, error = %err, "Cleanup failed");
                }
            },
            Action::Rotate => {
                Counters::add(&self.counters.check_failures, 1);
                warn!(target_id = %self.id, error = %err, "Check failed, forcing renewal");
                let mut state = self.state.lock().await;
                if let Err(e) = self.renew_locked(&mut state, now).await {
                    error!(target_id = %self.id, error = %e, "Forced renewal failed");
                }
            },
        }
    }

    async fn report_if_due(&self, now: DateTime<Utc>) {
        let Some(schedule) = self.settings.schedule else {
            return;
        };
        {
            let mut state = self.state.lock().await;
            let next = schedule.next_after(state.last_notified_at);
            debug!(target_id = %self.id, next = %next, "Compare report schedule");
            if next >= now {
                return;
            }
            state.last_notified_at = next;
        }

        let directory = {
            let state = self.state.lock().await;
            self.settings.policy.directory_of(&self.view(&state))
        };
        let shared = Arc::clone(&self.shared);
        let notice = tokio::task::spawn_blocking(move || shared.reports.disk_notice(&directory, now)).await;
        match notice {
            Ok(Ok((subject, body))) => {
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    deliver(notifier.as_ref(), &subject, &body).await;
                });
            },
            Ok(Err(e)) => warn!(target_id = %self.id, error = %e, "Disk report failed"),
            Err(e) => warn!(target_id = %self.id, error = %e, "Disk report task failed"),
        }
    }

    /// Stop the copier, close the output and release the descriptor.
    pub async fn close(&self) {
        {
            let mut control = self.control.lock();
            if control.phase == Phase::Closed {
                return;
            }
            control.phase = Phase::Closed;
        }
        self.release().await;
        info!(target_id = %self.id, path = %self.filepath.display(), "Target closed");
    }

    async fn release(&self) {
        let mut state = self.state.lock().await;
        if let Some(copier) = state.copier.take() {
            copier.stop().await;
        }
        if let Some(relay) = state.relay.take() {
            let mut relay = relay.lock().await;
            relay.output = None;
            if let Some(source) = relay.source.take() {
                self.shared.cache.release(&self.filepath, &source);
            }
        }
        if let TargetKind::ProcessStream(stream) = self.kind {
            let sink = self.shared.sink(stream);
            if sink.current_path().is_some() && sink.current_path() == state.current_output {
                sink.detach();
            }
        }
        state.current_output = None;
    }
}
