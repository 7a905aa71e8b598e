//! Periodic state snapshots

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use ldlm_core::LockService;

/// Write a snapshot every `interval` until `shutdown` fires.
///
/// Failures are logged and retried on the next tick; the final snapshot is
/// the caller's job once the server has stopped.
pub fn start_snapshot_task(
    service: Arc<LockService>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %path.display(), interval_ms = interval.as_millis() as u64, "Snapshot task started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; state was just restored.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = service.save_to_file(&path).await {
                        error!(path = %path.display(), error = %e, "Periodic snapshot failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Snapshot task stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use ldlm_core::LockManagerOptions;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_written_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let service = Arc::new(LockService::new(LockManagerOptions::default()));
        service.create_session(None).unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = start_snapshot_task(service, path.clone(), Duration::from_millis(500), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!path.exists());

        // The write started at the tick completes before the task sees shutdown
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(path.exists());
    }
}
