//! The control surface: one registry plus the scheduler that drives it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::registry::Registry;
use crate::rotate::{RotateOptions, RotateOutcome, RotatePredicate};
use crate::scheduler::{DEFAULT_INTERVAL, Scheduler};
use crate::target::{Target, TargetOptions, TargetSpec};

/// A rotation engine.
///
/// ```no_run
/// # async fn demo() -> loglife::Result<()> {
/// use loglife::{LogLife, TargetOptions};
///
/// let engine = LogLife::new();
/// engine.register(["./log/app.log"], &TargetOptions::default()).await?;
/// engine.start(None);
/// // ...
/// engine.stop(false).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LogLife {
    registry: Arc<Registry>,
    scheduler: Scheduler,
}

impl Default for LogLife {
    fn default() -> Self {
        Self::new()
    }
}

impl LogLife {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Engine over an existing registry, shared or not.
    pub fn with_registry(registry: impl Into<Arc<Registry>>) -> Self {
        let registry = registry.into();
        Self {
            scheduler: Scheduler::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// Override the stall threshold. Takes effect on the next `start`.
    #[must_use]
    pub fn with_stall_timeout(self, stall_timeout: Duration) -> Self {
        Self {
            scheduler: Scheduler::with_stall_timeout(Arc::clone(&self.registry), stall_timeout),
            registry: self.registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// See [`Registry::register`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for bad option values or path types.
    pub async fn register<I>(&self, specs: I, options: &TargetOptions) -> Result<Vec<Arc<Target>>>
    where
        I: IntoIterator,
        I::Item: Into<TargetSpec>,
    {
        self.registry.register(specs, options).await
    }

    /// Start (or restart) ticking every `interval`, 10s by default.
    pub fn start(&self, interval: Option<Duration>) {
        self.scheduler.start(interval.unwrap_or(DEFAULT_INTERVAL));
    }

    /// Stop ticking. Unless `timer_only`, close every target as well.
    pub async fn stop(&self, timer_only: bool) {
        self.scheduler.stop(timer_only).await;
    }

    pub fn get(&self, id: &str) -> Option<Arc<Target>> {
        self.registry.get(id)
    }

    /// Close and forget one target.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.registry.remove(id).await
    }

    /// One-shot copy-truncate of `path`; see [`crate::rotate::rotate`].
    ///
    /// # Errors
    ///
    /// Returns the IO error from opening, copying or truncating `path`.
    pub async fn rotate(
        &self,
        path: &Path,
        predicate: Option<RotatePredicate<'_>>,
        options: Option<&RotateOptions>,
    ) -> Result<Option<RotateOutcome>> {
        let defaults = RotateOptions::default();
        crate::rotate::rotate(path, predicate, options.unwrap_or(&defaults)).await
    }
}
