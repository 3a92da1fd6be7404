//! Background maintenance: expire entries and refresh aggregate stats.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::crypto::now_secs;
use crate::limits::ClipboardStats;
use crate::state::AppState;

/// Handle to the running maintenance task. Dropping it without calling
/// [`Manager::stop`] leaves the task running for the life of the process.
pub struct Manager {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Manager {
    /// Spawn the maintenance loop. The first pass runs immediately, then
    /// one pass per `manager_interval`.
    pub fn start(state: AppState) -> Manager {
        let (shutdown, mut stopped) = watch::channel(false);
        let interval = state.config.manager_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_pass(&state).await,
                    _ = stopped.changed() => break,
                }
            }
            tracing::debug!("manager stopped");
        });

        Manager { shutdown, handle }
    }

    /// Stop the loop. An in-flight pass completes; no new pass begins.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// One maintenance pass: drop expired entries, recompute the aggregate
/// count and byte total, and prune idle visitors. Per-entry errors are
/// logged and skipped so one bad file cannot stall expiry.
pub async fn run_pass(state: &AppState) {
    let entries = match state.clipboard.list().await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("manager: listing clipboard failed: {}", err);
            return;
        }
    };

    let now = now_secs();
    let mut stats = ClipboardStats::default();
    for entry in entries {
        if entry.expired(now) {
            tracing::debug!("manager: expiring {}", entry.id);
            if let Err(err) = state.clipboard.delete(&entry.id).await {
                tracing::warn!("manager: failed to expire {}: {}", entry.id, err);
            }
            continue;
        }
        stats.count += 1;
        stats.size += entry.size;
    }

    state.publish_stats(stats);
    state
        .visitors
        .lock()
        .expect("visitor mutex poisoned")
        .prune_all();
}
