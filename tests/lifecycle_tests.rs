//! Descriptor lifecycle: re-registration and shutdown never leak handles.
//!
//! Open-file counts are process-wide, so every test here is serialised.

mod common;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{append, fast_options, start_time, wait_until};
use loglife::source::{FileSource, Source, SourceOpener};
use loglife::{Error, LogLife, ManualClock, Readiness, Registry, Scheduler, TargetOptions, TargetSpec};
use serial_test::serial;
use tempfile::TempDir;

/// A source whose size lookups crawl while `armed` is set.
struct SlowSource {
    inner: FileSource,
    armed: Arc<AtomicBool>,
}

impl Source for SlowSource {
    fn size(&self) -> io::Result<u64> {
        if self.armed.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(800));
        }
        self.inner.size()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.inner.read_at(buf, offset)
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.inner.write_all_at(buf, offset)
    }

    fn truncate(&self) -> io::Result<()> {
        self.inner.truncate()
    }
}

struct SlowOpener {
    armed: Arc<AtomicBool>,
}

impl SourceOpener for SlowOpener {
    fn open(&self, path: &Path) -> io::Result<Arc<dyn Source>> {
        Ok(Arc::new(SlowSource {
            inner: FileSource::open(path)?,
            armed: Arc::clone(&self.armed),
        }))
    }
}

#[cfg(target_os = "linux")]
fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_concurrent_reregistration_leaks_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    append(&path, b"boot\n");
    let baseline = open_fds();

    let engine = LogLife::new();
    let options = fast_options();
    let (first, second) = tokio::join!(
        engine.register([path.clone()], &options),
        engine.register([path.clone()], &options),
    );
    let (first, second) = (first.unwrap().remove(0), second.unwrap().remove(0));

    // Whichever registration ran second closed the other's target.
    let states = [first.readiness(), second.readiness()];
    assert!(states.contains(&Readiness::Closed), "{states:?}");
    assert!(states.contains(&Readiness::Ready), "{states:?}");
    assert_eq!(engine.registry().len(), 1);
    assert_eq!(engine.registry().open_descriptors(), 1);

    engine.start(Some(Duration::from_millis(20)));
    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.stop(false).await;

    assert_eq!(engine.registry().open_descriptors(), 0);
    assert_eq!(open_fds(), baseline);
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_remove_releases_descriptor_and_output() {
    let tmp = TempDir::new().unwrap();
    let baseline = open_fds();

    let registry = Registry::new();
    let specs: Vec<TargetSpec> = (0..4)
        .map(|i| TargetSpec::path(tmp.path().join(format!("app{i}.log"))))
        .collect();
    registry.register(specs, &fast_options()).await.unwrap();
    assert_eq!(registry.open_descriptors(), 4);
    assert!(open_fds() >= baseline + 8);

    for id in registry.ids() {
        registry.remove(&id).await.unwrap();
    }
    assert_eq!(open_fds(), baseline);
}

#[tokio::test]
#[serial]
async fn test_unopenable_target_is_disabled_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let bad = tmp.path().join("missing-dir").join("app.log");
    let good = tmp.path().join("ok.log");

    let registry = Registry::new();
    let targets = registry
        .register([bad.clone(), good.clone()], &TargetOptions::default())
        .await
        .unwrap();

    assert!(matches!(targets[0].readiness(), Readiness::Failed(_)));
    assert_eq!(targets[1].readiness(), Readiness::Ready);
    assert_eq!(registry.open_descriptors(), 1);
    assert!(matches!(targets[0].renew().await, Err(Error::TargetDisabled { .. })));

    // A disabled target is skipped by ticks and stays registered.
    registry.tick(registry.now()).await;
    assert_eq!(registry.len(), 2);
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_closed_target_rejects_work() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry::new();
    let target = registry
        .register([tmp.path().join("a.log")], &TargetOptions::default())
        .await
        .unwrap()
        .remove(0);
    registry.shutdown().await;

    assert_eq!(target.readiness(), Readiness::Closed);
    assert!(matches!(target.renew().await, Err(Error::TargetClosed(_))));
    assert!(target.current_output().await.is_none());
}

#[tokio::test]
#[serial]
async fn test_path_aliases_share_one_target() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("d");
    std::fs::create_dir(&dir).unwrap();
    let direct = dir.join("app.log");
    let detour = tmp.path().join("d").join("..").join("d").join("app.log");

    let registry = Registry::new();
    let first = registry
        .register([direct], &fast_options())
        .await
        .unwrap()
        .remove(0);
    let second = registry
        .register([detour], &fast_options())
        .await
        .unwrap()
        .remove(0);

    assert_eq!(first.readiness(), Readiness::Closed);
    assert_eq!(second.readiness(), Readiness::Ready);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.open_descriptors(), 1);
    registry.shutdown().await;
    assert_eq!(registry.open_descriptors(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_stalled_tick_blocks_new_ticks_until_it_ends() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("slow.log");
    append(&path, b"boot\n");

    let clock = ManualClock::new(start_time());
    let armed = Arc::new(AtomicBool::new(false));
    let registry = Registry::builder()
        .clock(Arc::new(clock.clone()))
        .opener(Arc::new(SlowOpener { armed: Arc::clone(&armed) }))
        .hostname("test-host")
        .build();
    let options = TargetOptions {
        span: Some(1000u64.into()),
        copy_interval: Some("1h".into()),
        ..fast_options()
    };
    registry.register([path.clone()], &options).await.unwrap();

    armed.store(true, Ordering::SeqCst);
    clock.advance(chrono::Duration::seconds(2));

    let scheduler = Scheduler::with_stall_timeout(Arc::new(registry), Duration::from_millis(100));
    scheduler.start(Duration::from_millis(20));
    assert!(
        wait_until(Duration::from_secs(5), || !scheduler.is_running()).await,
        "scheduler never noticed the stall"
    );

    assert!(scheduler.busy_since().is_some());
    assert!(!scheduler.tick_now().await);

    armed.store(false, Ordering::SeqCst);
    assert!(
        wait_until(Duration::from_secs(5), || scheduler.busy_since().is_none()).await,
        "stalled tick never finished"
    );
    assert!(scheduler.tick_now().await);
    scheduler.stop(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_stop_cancels_stalled_tick() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("slow.log");
    append(&path, b"boot\n");

    let clock = ManualClock::new(start_time());
    let armed = Arc::new(AtomicBool::new(false));
    let registry = Arc::new(
        Registry::builder()
            .clock(Arc::new(clock.clone()))
            .opener(Arc::new(SlowOpener { armed: Arc::clone(&armed) }))
            .hostname("test-host")
            .build(),
    );
    let options = TargetOptions {
        span: Some(1000u64.into()),
        copy_interval: Some("1h".into()),
        ..fast_options()
    };
    registry.register([path.clone()], &options).await.unwrap();

    armed.store(true, Ordering::SeqCst);
    clock.advance(chrono::Duration::seconds(2));

    let scheduler = Scheduler::with_stall_timeout(Arc::clone(&registry), Duration::from_millis(100));
    scheduler.start(Duration::from_millis(20));
    assert!(wait_until(Duration::from_secs(5), || !scheduler.is_running()).await);
    assert!(scheduler.busy_since().is_some());

    scheduler.stop(true).await;
    assert!(scheduler.busy_since().is_none());
    armed.store(false, Ordering::SeqCst);
    assert!(scheduler.tick_now().await);
    registry.shutdown().await;
}
