//! One-shot rotation of a single file.

use anyhow::{Context, Result};
use std::path::Path;

use loglife::RotateOptions;

/// Copy `path` aside and truncate it in place.
pub async fn execute(path: &Path, ext: Option<&str>) -> Result<()> {
    let mut options = RotateOptions::default();
    if let Some(ext) = ext {
        let ext = if ext.starts_with('.') { ext.to_string() } else { format!(".{ext}") };
        options = options.with_ext(ext);
    }

    let outcome = loglife::rotate(path, None, &options)
        .await
        .with_context(|| format!("Failed to rotate {}", path.display()))?;
    match outcome {
        Some(outcome) => println!("{}", outcome.destination.display()),
        None => println!("Skipped {}: not a regular file", path.display()),
    }
    Ok(())
}
