//! Process-stream targets: `process.stdout` / `process.stderr`.
//!
//! Their outputs live in the current directory, so each test moves into a
//! temporary directory and runs serialised.

mod common;

use std::io::Write;
use std::path::{Path, PathBuf};

use common::{fast_options, gunzip, manual_registry, payload_lines, start_time};
use loglife::target::TargetKind;
use loglife::{Clock, ManualClock, StdStream, TargetOptions};
use serial_test::serial;
use tempfile::TempDir;

/// Restores the working directory on drop.
struct InDir {
    previous: PathBuf,
}

impl InDir {
    fn enter(dir: &Path) -> Self {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self { previous }
    }
}

impl Drop for InDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

#[tokio::test]
#[serial]
async fn test_stdout_designator_tees_into_rotating_outputs() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().canonicalize().unwrap();
    let _cwd = InDir::enter(&dir);

    let clock = ManualClock::new(start_time());
    let registry = manual_registry(&clock);
    let options = TargetOptions {
        span: Some(1000u64.into()),
        ..fast_options()
    };
    let target = registry
        .register(["process.stdout"], &options)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(target.kind(), TargetKind::ProcessStream(StdStream::Stdout));
    assert_eq!(target.filepath(), dir.join("process.stdout.out"));
    assert_eq!(registry.open_descriptors(), 0);

    let mut writer = registry.stream_writer(StdStream::Stdout);
    writeln!(writer, "first output line").unwrap();
    writer.flush().unwrap();
    let first = target.current_output().await.unwrap();
    assert_eq!(std::fs::read_to_string(&first).unwrap(), "first output line\n");

    clock.advance(chrono::Duration::seconds(2));
    registry.tick(clock.now()).await;
    writeln!(writer, "second output line").unwrap();
    writer.flush().unwrap();

    let archives = target.list().unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(
        payload_lines(&gunzip(&dir.join(&archives[0]))),
        vec!["first output line"]
    );
    let second = target.current_output().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(std::fs::read_to_string(&second).unwrap(), "second output line\n");

    registry.shutdown().await;
    writeln!(writer, "after shutdown").unwrap();
    assert_eq!(std::fs::read_to_string(&second).unwrap(), "second output line\n");
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_stream_symlink_points_at_live_output() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().canonicalize().unwrap();
    let _cwd = InDir::enter(&dir);

    let clock = ManualClock::new(start_time());
    let registry = manual_registry(&clock);
    let options = TargetOptions {
        symlink: Some(true),
        ..fast_options()
    };
    let target = registry
        .register(["process.stderr"], &options)
        .await
        .unwrap()
        .remove(0);

    let link = dir.join("process.stderr.out");
    let first = target.current_output().await.unwrap();
    assert_eq!(std::fs::read_link(&link).unwrap(), first);

    clock.advance(chrono::Duration::seconds(1));
    let renewal = target.renew().await.unwrap();
    assert_eq!(std::fs::read_link(&link).unwrap(), renewal.current);
    registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_writer_without_target_only_writes_stream() {
    let tmp = TempDir::new().unwrap();
    let _cwd = InDir::enter(tmp.path());

    let clock = ManualClock::new(start_time());
    let registry = manual_registry(&clock);
    let mut writer = registry.stream_writer(StdStream::Stderr);
    writeln!(writer, "nobody is listening").unwrap();
    assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
}
