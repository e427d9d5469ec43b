//! The registry of active targets.
//!
//! A [`Registry`] owns every registered [`Target`], the descriptor cache they
//! share and the capabilities they use (clock, source opener, disk sampler).
//! Ticks walk the targets sequentially in registration order; each check
//! completes before the next begins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::notify::{DiskSampler, Reports, SysinfoSampler, build_notifier};
use crate::renewal::{StreamSink, StreamWriter};
use crate::source::{DescriptorCache, FsOpener, SourceOpener};
use crate::target::{Action, StdStream, Target, TargetKind, TargetOptions, TargetSpec};

/// State shared by a registry and its targets.
pub(crate) struct Shared {
    pub cache: DescriptorCache,
    pub opener: Arc<dyn SourceOpener>,
    pub clock: Arc<dyn Clock>,
    pub reports: Reports,
    stdout: StreamSink,
    stderr: StreamSink,
}

impl Shared {
    pub fn sink(&self, stream: StdStream) -> &StreamSink {
        match stream {
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }
}

/// Builds a [`Registry`] with custom capabilities.
pub struct RegistryBuilder {
    clock: Arc<dyn Clock>,
    opener: Arc<dyn SourceOpener>,
    sampler: Arc<dyn DiskSampler>,
    hostname: Option<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            opener: Arc::new(FsOpener),
            sampler: Arc::new(SysinfoSampler),
            hostname: None,
        }
    }
}

impl RegistryBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    #[must_use]
    pub fn sampler(mut self, sampler: Arc<dyn DiskSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Host name used in report subjects.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn build(self) -> Registry {
        let reports = match self.hostname {
            Some(hostname) => Reports::with_hostname(self.sampler, hostname),
            None => Reports::new(self.sampler),
        };
        Registry {
            shared: Arc::new(Shared {
                cache: DescriptorCache::new(),
                opener: self.opener,
                clock: self.clock,
                reports,
                stdout: StreamSink::new(),
                stderr: StreamSink::new(),
            }),
            targets: RwLock::new(Vec::new()),
            registering: Mutex::new(()),
        }
    }
}

/// A target ready to be created.
struct Plan {
    id: String,
    filepath: PathBuf,
    kind: TargetKind,
    options: TargetOptions,
}

/// All active targets.
pub struct Registry {
    shared: Arc<Shared>,
    targets: RwLock<Vec<Arc<Target>>>,
    registering: Mutex<()>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("targets", &self.ids())
            .field("open_descriptors", &self.open_descriptors())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with the system clock, plain files and `sysinfo` disks.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register targets.
    ///
    /// `options` is the shared record; record specifiers override it field by
    /// field. Every specifier is validated before any target is touched. A
    /// specifier whose id or path is already registered replaces the prior
    /// target, which is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for bad option values or path types. Targets
    /// that fail to open are not errors: they are returned disabled.
    pub async fn register<I>(&self, specs: I, options: &TargetOptions) -> Result<Vec<Arc<Target>>>
    where
        I: IntoIterator,
        I::Item: Into<TargetSpec>,
    {
        let plans = specs
            .into_iter()
            .map(|spec| plan(&spec.into(), options))
            .collect::<Result<Vec<_>>>()?;
        let resolved = plans
            .into_iter()
            .map(|plan| plan.options.resolve().map(|settings| (plan, settings)))
            .collect::<Result<Vec<_>>>()?;

        let _registering = self.registering.lock().await;
        let mut added = Vec::with_capacity(resolved.len());
        for (plan, settings) in resolved {
            for prior in self.take_matching(&plan.id, &plan.filepath, plan.kind) {
                warn!(target_id = %prior.id(), "Target already registered, replacing");
                prior.close().await;
            }

            let notifier = plan
                .options
                .notifier
                .clone()
                .unwrap_or_else(|| build_notifier(plan.options.report.as_ref()));
            let target = Arc::new(Target::new(
                plan.id,
                plan.filepath,
                plan.kind,
                settings,
                notifier,
                Arc::clone(&self.shared),
            ));
            self.targets.write().push(Arc::clone(&target));
            target.open().await;
            added.push(target);
        }
        Ok(added)
    }

    fn take_matching(&self, id: &str, filepath: &Path, kind: TargetKind) -> Vec<Arc<Target>> {
        let mut targets = self.targets.write();
        let (taken, kept): (Vec<_>, Vec<_>) = targets.drain(..).partition(|t| {
            t.id() == id
                || (kind == TargetKind::File
                    && t.kind() == TargetKind::File
                    && t.action() == Action::Rotate
                    && t.filepath() == filepath)
        });
        *targets = kept;
        taken
    }

    /// Target registered under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<Target>> {
        self.targets.read().iter().find(|t| t.id() == id).cloned()
    }

    /// Close and forget the target registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is registered under `id`.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let target = {
            let mut targets = self.targets.write();
            let index = targets
                .iter()
                .position(|t| t.id() == id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            targets.remove(index)
        };
        target.close().await;
        Ok(())
    }

    /// Snapshot of the registered targets, in registration order.
    pub fn targets(&self) -> Vec<Arc<Target>> {
        self.targets.read().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.targets.read().iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Number of source descriptors currently held open.
    pub fn open_descriptors(&self) -> usize {
        self.shared.cache.len()
    }

    /// Current time according to the registry's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// A writer that tees into `stream` and its process-stream target's
    /// current output.
    pub fn stream_writer(&self, stream: StdStream) -> StreamWriter {
        StreamWriter::new(stream, self.shared.sink(stream).clone())
    }

    /// Check every target once, sequentially.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let targets = self.targets();
        debug!(targets = targets.len(), "Tick");
        for (index, target) in targets.iter().enumerate() {
            target.check(now, index == 0).await;
        }
    }

    /// Close every target and release every descriptor.
    pub async fn shutdown(&self) {
        let _registering = self.registering.lock().await;
        let targets: Vec<_> = self.targets.write().drain(..).collect();
        for target in &targets {
            target.close().await;
        }
        self.shared.cache.clear();
        info!(closed = targets.len(), "Registry shut down");
    }
}

fn plan(spec: &TargetSpec, shared: &TargetOptions) -> Result<Plan> {
    let (id, options) = match spec {
        TargetSpec::Path(path) => (path.display().to_string(), shared.clone()),
        TargetSpec::Record { id, options } => (id.clone(), options.merged_over(shared)),
    };
    if id.trim().is_empty() {
        return Err(Error::config("target id must not be empty"));
    }

    if options.action() == Action::Sweep {
        return Ok(Plan {
            filepath: PathBuf::from(&id),
            id,
            kind: TargetKind::File,
            options,
        });
    }

    if let Some(stream) = StdStream::from_designator(&id) {
        let cwd = std::env::current_dir().map_err(|e| Error::io("resolve current directory", e))?;
        return Ok(Plan {
            filepath: cwd.join(format!("{}.out", stream.designator())),
            id,
            kind: TargetKind::ProcessStream(stream),
            options,
        });
    }

    let filepath = canonical_file_path(Path::new(&id));
    if filepath.is_dir() {
        return Err(Error::config(format!(
            "'{}' is a directory; use a sweep target for directories",
            filepath.display()
        )));
    }
    Ok(Plan {
        id,
        filepath,
        kind: TargetKind::File,
        options,
    })
}

/// `path` with its parent directory resolved, so that every spelling of one
/// file maps to the same descriptor and target. The file itself may not exist
/// yet. A parent that cannot be resolved leaves `path` as given; opening it
/// will fail and disable the target.
fn canonical_file_path(path: &Path) -> PathBuf {
    let Some(name) = path.file_name() else {
        return path.to_path_buf();
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match parent.canonicalize() {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Readiness;
    use tempfile::TempDir;

    #[test]
    fn test_plan_designators_and_paths() {
        let plan_for = |s: &str| plan(&TargetSpec::from(s), &TargetOptions::default()).unwrap();

        let stdout = plan_for("process.stdout");
        assert_eq!(stdout.kind, TargetKind::ProcessStream(StdStream::Stdout));
        assert!(stdout.filepath.ends_with("process.stdout.out"));

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let spelled = tmp.path().join(".").join("app.log");
        let file = plan_for(&spelled.to_string_lossy());
        assert_eq!(file.kind, TargetKind::File);
        assert_eq!(file.id, spelled.display().to_string());
        assert_eq!(file.filepath, dir.join("app.log"));

        let unresolved = plan_for("./no-such-dir/app.log");
        assert_eq!(unresolved.filepath, PathBuf::from("./no-such-dir/app.log"));
    }

    #[test]
    fn test_plan_rejects_directory_for_rotate() {
        let tmp = TempDir::new().unwrap();
        let spec = TargetSpec::path(tmp.path());
        assert!(matches!(
            plan(&spec, &TargetOptions::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_register_get_remove() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let registry = Registry::builder().hostname("test").build();

        let added = registry
            .register([path.clone()], &TargetOptions::default())
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].readiness(), Readiness::Ready);
        assert_eq!(registry.open_descriptors(), 1);

        let id = path.display().to_string();
        assert!(registry.get(&id).is_some());
        registry.remove(&id).await.unwrap();
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.open_descriptors(), 0);
        assert!(matches!(registry.remove(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_debug_lists_targets() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let engine = crate::engine::LogLife::with_registry(Registry::new());
        engine.register([path.clone()], &TargetOptions::default()).await.unwrap();

        let rendered = format!("{engine:?}");
        assert!(rendered.contains("Registry"), "{rendered}");
        assert!(rendered.contains("open_descriptors: 1"), "{rendered}");
        engine.stop(false).await;
    }

    #[tokio::test]
    async fn test_bad_option_registers_nothing() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new();
        let options = TargetOptions {
            cap: Some("lots".into()),
            ..Default::default()
        };
        let result = registry.register([tmp.path().join("a.log")], &options).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_prior_target() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.log");
        let registry = Registry::new();

        let first = registry.register([path.clone()], &TargetOptions::default()).await.unwrap();
        let second = registry.register([path.clone()], &TargetOptions::default()).await.unwrap();

        assert_eq!(first[0].readiness(), Readiness::Closed);
        assert_eq!(second[0].readiness(), Readiness::Ready);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.open_descriptors(), 1);

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(registry.open_descriptors(), 0);
    }
}
