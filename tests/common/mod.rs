//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use loglife::reliability::RetryConfig;
use loglife::{ManualClock, Registry, TargetOptions};

/// A fixed instant for manual clocks.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
}

/// Registry driven by `clock`, with a fixed host name.
pub fn manual_registry(clock: &ManualClock) -> Registry {
    Registry::builder()
        .clock(Arc::new(clock.clone()))
        .hostname("test-host")
        .build()
}

/// Options with a fast copier and a fast truncate-confirm loop.
pub fn fast_options() -> TargetOptions {
    TargetOptions {
        copy_interval: Some(10u64.into()),
        confirm: Some(RetryConfig::truncate_confirm().with_initial_delay(Duration::from_millis(1))),
        ..TargetOptions::default()
    }
}

/// Append `bytes` the way a logging process would.
pub fn append(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).create(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

/// Decompress a gzip archive into a string.
pub fn gunzip(path: &Path) -> String {
    let mut out = String::new();
    GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    out
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Sorted file names in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Content lines, close markers excluded.
pub fn payload_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.ends_with(loglife::renewal::CLOSE_MARKER))
        .map(ToString::to_string)
        .collect()
}
