//! Truncate-confirm loop.
//!
//! After a truncate, some filesystems keep reporting the old length for a
//! while, and a writer may append between the truncate and our next look.
//! The loop polls the size; while it is not below the size captured before
//! the truncate, the bytes past that size are read, the file is truncated
//! again and those bytes are written back at its head.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::reliability::{RetryConfig, retry_async};
use crate::source::Source;

/// How a truncate-confirm loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOutcome {
    /// Whether the truncate was observed to take effect.
    pub confirmed: bool,
    /// Number of size checks made.
    pub attempts: u32,
    /// Bytes written back at the head of the source.
    pub recovered_bytes: u64,
    /// Source size observed at the last check.
    pub final_size: u64,
}

enum Attempt {
    Pending { size: u64 },
    Failed(io::Error),
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending { size } => write!(f, "truncate not visible yet (size {size})"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Truncate `source` and confirm it took effect.
///
/// `pre_size` is the length captured immediately before truncating. The loop
/// never blocks past the retry budget: an unconfirmed truncate is logged and
/// reported through [`ConfirmOutcome::confirmed`]. With `pre_size == 0`
/// nothing was relayed, so the source is left untouched and anything written
/// since stays at its head.
///
/// # Errors
///
/// Returns an IO error only if the source itself fails (stat, read, truncate
/// or write), never for an unconfirmed truncate.
pub async fn truncate_confirmed(
    source: Arc<dyn Source>,
    pre_size: u64,
    config: &RetryConfig,
    label: &str,
) -> Result<ConfirmOutcome> {
    if pre_size == 0 {
        return Ok(ConfirmOutcome {
            confirmed: true,
            attempts: 0,
            recovered_bytes: 0,
            final_size: 0,
        });
    }

    let first = Arc::clone(&source);
    tokio::task::spawn_blocking(move || first.truncate())
        .await?
        .map_err(|e| Error::io(format!("truncate {label}"), e))?;

    let attempts = Arc::new(AtomicU32::new(0));
    let recovered = Arc::new(AtomicU64::new(0));

    let result = retry_async(
        config,
        "truncate-confirm",
        || {
            let source = Arc::clone(&source);
            let attempts = Arc::clone(&attempts);
            let recovered = Arc::clone(&recovered);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::task::spawn_blocking(move || check_once(source.as_ref(), pre_size, &recovered))
                    .await
                    .map_err(|e| Attempt::Failed(io::Error::other(e)))?
            }
        },
        |attempt| matches!(attempt, Attempt::Pending { .. }),
    )
    .await;

    let attempts = attempts.load(Ordering::SeqCst);
    let recovered_bytes = recovered.load(Ordering::SeqCst);
    match result {
        Ok(size) => {
            debug!(source = %label, attempts, recovered_bytes, size, "Truncate confirmed");
            Ok(ConfirmOutcome {
                confirmed: true,
                attempts,
                recovered_bytes,
                final_size: size,
            })
        },
        Err(Attempt::Pending { size }) => {
            warn!(
                source = %label,
                attempts,
                pre_size,
                size,
                "Truncate could not be confirmed, continuing"
            );
            Ok(ConfirmOutcome {
                confirmed: false,
                attempts,
                recovered_bytes,
                final_size: size,
            })
        },
        Err(Attempt::Failed(e)) => Err(Error::io(format!("confirm truncate {label}"), e)),
    }
}

fn check_once(source: &dyn Source, pre_size: u64, recovered: &AtomicU64) -> std::result::Result<u64, Attempt> {
    let size = source.size().map_err(Attempt::Failed)?;
    if size < pre_size || size == 0 {
        return Ok(size);
    }

    let delta_len = usize::try_from(size - pre_size)
        .map_err(|_| Attempt::Failed(io::Error::other("delta too large")))?;
    let delta = source.read_range(pre_size, delta_len).map_err(Attempt::Failed)?;
    source.truncate().map_err(Attempt::Failed)?;
    if !delta.is_empty() {
        source.write_all_at(&delta, 0).map_err(Attempt::Failed)?;
        recovered.fetch_add(delta.len() as u64, Ordering::SeqCst);
    }
    Err(Attempt::Pending { size })
}
