use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::backend::BackupBackend;
use crate::services::size_tracker::IncrementalSizeTracker;

/// Per-path background refresh timers.
///
/// Each monitored path gets an independent repeating timer that lists the
/// current backups and force-refreshes the tracker, keeping the size cache
/// warm. Refresh failures are logged and ignored; the timer keeps running
/// until the path is unmonitored.
pub struct BackgroundMonitor {
    backend: Arc<dyn BackupBackend>,
    tracker: Arc<IncrementalSizeTracker>,
    timers: DashMap<String, CancellationToken>,
}

impl BackgroundMonitor {
    pub fn new(backend: Arc<dyn BackupBackend>, tracker: Arc<IncrementalSizeTracker>) -> Self {
        Self {
            backend,
            tracker,
            timers: DashMap::new(),
        }
    }

    /// Install a repeating refresh timer for `path`, replacing any
    /// existing one. Must be called within a tokio runtime.
    pub fn start_monitoring(&self, path: &str, interval: Duration) {
        self.stop_monitoring(path);

        let token = CancellationToken::new();
        self.timers.insert(path.to_string(), token.clone());

        let backend = self.backend.clone();
        let tracker = self.tracker.clone();
        let path = path.to_string();
        tracing::info!(path = %path, interval_ms = interval.as_millis() as u64, "monitoring started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick; the first refresh happens
            // one full interval after monitoring starts.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(path = %path, "monitoring stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = refresh(&backend, &tracker, &path).await {
                            tracing::warn!(path = %path, error = %e, "background refresh failed");
                        }
                    }
                }
            }
        });
    }

    /// Cancel the timer for `path`. Returns false if it was not monitored.
    pub fn stop_monitoring(&self, path: &str) -> bool {
        if let Some((_, token)) = self.timers.remove(path) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn stop_all(&self) {
        for entry in self.timers.iter() {
            entry.value().cancel();
        }
        self.timers.clear();
    }

    pub fn is_monitoring(&self, path: &str) -> bool {
        self.timers.contains_key(path)
    }
}

async fn refresh(
    backend: &Arc<dyn BackupBackend>,
    tracker: &Arc<IncrementalSizeTracker>,
    path: &str,
) -> anyhow::Result<()> {
    let backups = backend.list_backups(path).await?;
    tracker.calculate_total_size(path, &backups, true).await?;
    Ok(())
}
