//! Periodic tail copy from a source into its current output.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

use super::Relay;

/// Handle on a running copier task.
#[derive(Debug)]
pub(crate) struct Copier {
    handle: JoinHandle<()>,
}

impl Copier {
    /// Start copying `chunk`-sized reads every `interval`.
    ///
    /// The first copy happens one full interval after start.
    pub fn spawn(relay: Arc<Mutex<Relay>>, interval: Duration, chunk: usize, label: String) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let guard = Arc::clone(&relay).lock_owned().await;
                let copied = tokio::task::spawn_blocking(move || {
                    let mut relay = guard;
                    relay.copy_chunk(chunk)
                })
                .await;

                match copied {
                    Ok(Ok(0)) => {},
                    Ok(Ok(n)) => trace!(target_id = %label, bytes = n, "Copied tail"),
                    Ok(Err(e)) => warn!(target_id = %label, error = %e, "Tail copy failed"),
                    Err(e) => {
                        warn!(target_id = %label, error = %e, "Tail copy task failed, stopping copier");
                        break;
                    },
                }
            }
        });
        Self { handle }
    }

    /// Cancel the copier and wait until it has stopped.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renewal::create_output;
    use crate::source::FileSource;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copier_relays_appended_bytes() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("app.log");
        let out = tmp.path().join("app.out.log");
        std::fs::write(&src, b"hello").unwrap();

        let mut relay = Relay::new(Arc::new(FileSource::open(&src).unwrap()));
        relay.output = Some(create_output(&out).unwrap());
        let relay = Arc::new(Mutex::new(relay));

        let copier = Copier::spawn(relay.clone(), Duration::from_millis(10), 1024, "app".into());
        let mut copied = Vec::new();
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            copied = std::fs::read(&out).unwrap();
            if copied == b"hello" {
                break;
            }
        }
        copier.stop().await;

        assert_eq!(copied, b"hello");
        assert_eq!(relay.lock().await.cursor, 5);
    }
}
