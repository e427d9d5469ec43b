//! One-shot rotation against a writer that never reopens its file.

use std::fs::OpenOptions;
use std::io::Write;

use loglife::{RotateOptions, rotate};
use tempfile::TempDir;

#[tokio::test]
async fn test_writer_keeps_its_handle_across_rotation() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nohup.out");
    let mut writer = OpenOptions::new().create(true).append(true).open(&path).unwrap();
    writer.write_all(b"before rotation\n").unwrap();

    let options = RotateOptions::default();
    let outcome = rotate(&path, None, &options).await.unwrap().unwrap();

    writer.write_all(b"after rotation\n").unwrap();
    writer.flush().unwrap();

    assert_eq!(std::fs::read_to_string(&outcome.destination).unwrap(), "before rotation\n");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "after rotation\n");
}

#[tokio::test]
async fn test_destination_name_carries_timestamp() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    std::fs::write(&path, b"one\n").unwrap();

    let options = RotateOptions::default().with_ext(".txt");
    let outcome = rotate(&path, None, &options).await.unwrap().unwrap();
    let name = outcome.destination.file_name().unwrap().to_string_lossy().into_owned();

    // app_<yyMMdd>_<HHmmss>.txt
    let stamp = name.strip_prefix("app_").unwrap().strip_suffix(".txt").unwrap();
    assert_eq!(stamp.len(), 13, "{name}");
    assert_eq!(stamp.as_bytes()[6], b'_');
    assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_back_to_back_rotations_keep_both_copies() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nohup.out");
    let options = RotateOptions::default();

    std::fs::write(&path, b"first\n").unwrap();
    let first = rotate(&path, None, &options).await.unwrap().unwrap();
    std::fs::write(&path, b"second\n").unwrap();
    let second = rotate(&path, None, &options).await.unwrap().unwrap();

    assert_ne!(first.destination, second.destination);
    assert_eq!(std::fs::read_to_string(&first.destination).unwrap(), "first\n");
    assert_eq!(std::fs::read_to_string(&second.destination).unwrap(), "second\n");
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}
