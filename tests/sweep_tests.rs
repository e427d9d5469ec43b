//! Sweep-mode scenarios: age-based deletion over a directory.

mod common;

use std::fs::{File, FileTimes};
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{TimeZone, Utc};
use common::{manual_registry, wait_until};
use loglife::config::LogLifeConfig;
use loglife::{Action, Clock, ManualClock, TargetOptions, TargetSpec};
use tempfile::TempDir;

fn write_aged(path: &Path, age: Duration) {
    std::fs::write(path, b"x").unwrap();
    let stamp = SystemTime::now() - age;
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_modified(stamp).set_accessed(stamp))
        .unwrap();
}

#[tokio::test]
async fn test_sweep_removes_old_files_of_any_extension() {
    let tmp = TempDir::new().unwrap();
    let ten_days = Duration::from_secs(10 * 86_400);
    for name in ["old.log", "old.gz", "old.txt"] {
        write_aged(&tmp.path().join(name), ten_days);
    }
    std::fs::write(tmp.path().join("fresh.log"), b"x").unwrap();
    std::fs::create_dir(tmp.path().join("nested")).unwrap();

    let clock = ManualClock::new(Utc::now() - chrono::Duration::days(2));
    let registry = manual_registry(&clock);
    let options = TargetOptions {
        directory: Some(tmp.path().to_path_buf()),
        span: Some("1d".into()),
        ..TargetOptions::default()
    };
    let target = registry
        .register([TargetSpec::record("sweep1", options)], &TargetOptions::default())
        .await
        .unwrap()
        .remove(0);
    assert_eq!(target.action(), Action::Sweep);
    assert_eq!(registry.open_descriptors(), 0);

    clock.set(Utc::now());
    registry.tick(clock.now()).await;

    let dir = tmp.path().to_path_buf();
    assert!(
        wait_until(Duration::from_secs(2), || {
            ["old.log", "old.gz", "old.txt"].iter().all(|n| !dir.join(n).exists())
        })
        .await
    );
    assert!(dir.join("fresh.log").exists());
    assert!(dir.join("nested").is_dir());
    assert_eq!(target.last_rotated_at().await, clock.now());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_sweep_waits_for_span() {
    let tmp = TempDir::new().unwrap();
    write_aged(&tmp.path().join("old.log"), Duration::from_secs(10 * 86_400));

    let clock = ManualClock::new(Utc::now());
    let registry = manual_registry(&clock);
    let options = TargetOptions {
        directory: Some(tmp.path().to_path_buf()),
        span: Some("1d".into()),
        ..TargetOptions::default()
    };
    registry
        .register([TargetSpec::record("sweep1", options)], &TargetOptions::default())
        .await
        .unwrap();

    clock.advance(chrono::Duration::hours(1));
    registry.tick(clock.now()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tmp.path().join("old.log").exists());
    registry.shutdown().await;
}

#[tokio::test]
async fn test_configured_sweep_uses_embedded_dates() {
    let tmp = TempDir::new().unwrap();
    for name in ["app.261001.log", "app.261020.log", "app.nodate.log", "notes.txt"] {
        std::fs::write(tmp.path().join(name), b"x").unwrap();
    }
    let toml_str = format!(
        r#"
[[targets]]
id = "dated"
directory = {:?}
include = "*.log"
span = "1d"
time_position = {{ from = 4 }}
"#,
        tmp.path().to_string_lossy()
    );
    let config: LogLifeConfig = toml::from_str(&toml_str).unwrap();
    config.validate().unwrap();
    let (defaults, specs) = config.registration().unwrap();

    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 15, 0, 0, 0).unwrap());
    let registry = manual_registry(&clock);
    registry.register(specs, &defaults).await.unwrap();

    clock.set(Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap());
    registry.tick(clock.now()).await;

    let dir = tmp.path().to_path_buf();
    assert!(
        wait_until(Duration::from_secs(2), || {
            !dir.join("app.261001.log").exists() && !dir.join("app.nodate.log").exists()
        })
        .await
    );
    assert!(dir.join("app.261020.log").exists());
    assert!(dir.join("notes.txt").exists());
    registry.shutdown().await;
}
