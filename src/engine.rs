use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::backend::{BackupBackend, SettingsStore};
use crate::config::CoreConfig;
use crate::models::backup::Backup;
use crate::models::policy::RetentionPolicy;
use crate::models::report::{EvaluationResult, ExecutionReport};
use crate::models::settings::RetentionSettings;
use crate::services::executor::{CleanupOptions, PolicyExecutor};
use crate::services::monitor::BackgroundMonitor;
use crate::services::size_cache::SizeCache;
use crate::services::size_tracker::{IncrementalSizeTracker, SizeComputation};
use crate::services::task_queue::BackgroundTaskQueue;
use crate::services::warnings::{self, RetentionPreview, RetentionWarning};

/// Wires the retention services together for one process.
///
/// Construct once with the storage backend, keep behind an `Arc`, and
/// share with whatever serves the UI/automation layers. All state lives in
/// the engine; the backend and settings store are treated as black boxes.
pub struct RetentionEngine {
    backend: Arc<dyn BackupBackend>,
    settings: Option<Arc<dyn SettingsStore>>,
    tracker: Arc<IncrementalSizeTracker>,
    monitor: BackgroundMonitor,
    executor: PolicyExecutor,
}

impl RetentionEngine {
    /// Must be called within a tokio runtime (spawns the task queue
    /// scheduler).
    pub fn new(config: CoreConfig, backend: Arc<dyn BackupBackend>) -> Self {
        let cache = Arc::new(SizeCache::new(config.cache_capacity, config.cache_ttl));
        let queue = Arc::new(BackgroundTaskQueue::new(config.queue_concurrency));
        let tracker = Arc::new(IncrementalSizeTracker::new(
            backend.clone(),
            cache,
            queue,
            config.oracle_batch_size,
        ));
        let monitor = BackgroundMonitor::new(backend.clone(), tracker.clone());
        let executor = PolicyExecutor::new(backend.clone(), config);

        Self {
            backend,
            settings: None,
            tracker,
            monitor,
            executor,
        }
    }

    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    // ── Size tracking ──

    /// Total size of `backups` under `path`, computed incrementally.
    pub async fn calculate_total_size(
        &self,
        path: &str,
        backups: &[Backup],
        force_refresh: bool,
    ) -> anyhow::Result<SizeComputation> {
        self.tracker.calculate_total_size(path, backups, force_refresh).await
    }

    /// Drop cached size state for a path.
    pub fn invalidate(&self, path: &str) {
        self.tracker.invalidate(path);
    }

    pub fn start_monitoring(&self, path: &str, interval: Duration) {
        self.monitor.start_monitoring(path, interval);
    }

    pub fn stop_monitoring(&self, path: &str) -> bool {
        self.monitor.stop_monitoring(path)
    }

    pub fn stop_all_monitoring(&self) {
        self.monitor.stop_all();
    }

    pub fn is_monitoring(&self, path: &str) -> bool {
        self.monitor.is_monitoring(path)
    }

    // ── Retention ──

    pub fn evaluate_multiple_policies(
        &self,
        backups: &[Backup],
        policies: &[RetentionPolicy],
    ) -> EvaluationResult {
        PolicyExecutor::evaluate_multiple_policies(backups, policies)
    }

    pub async fn execute_retention_cleanup(
        &self,
        path: &str,
        policies: &[RetentionPolicy],
        options: CleanupOptions,
    ) -> anyhow::Result<ExecutionReport> {
        let report = self.executor.execute_retention_cleanup(path, policies, options).await?;
        if !report.dry_run && !report.deleted_backups.is_empty() {
            // Sizes changed under us; the next computation re-measures.
            self.tracker.invalidate(path);
        }
        Ok(report)
    }

    /// Preview the stored retention settings against the live backup list.
    pub async fn retention_preview(&self, path: &str) -> anyhow::Result<RetentionPreview> {
        let backups = self.backend.list_backups(path).await?;
        let settings = self.load_settings().await?;
        Ok(warnings::generate_retention_preview(&backups, &settings))
    }

    /// Warnings for the stored retention settings against the live list.
    pub async fn retention_warnings(&self, path: &str) -> anyhow::Result<Vec<RetentionWarning>> {
        let backups = self.backend.list_backups(path).await?;
        let settings = self.load_settings().await?;
        Ok(warnings::analyze_retention_warnings(&backups, &settings))
    }

    // ── Settings ──

    pub async fn load_settings(&self) -> anyhow::Result<RetentionSettings> {
        let store = self
            .settings
            .as_ref()
            .context("no settings store configured")?;
        store.get_retention_settings().await
    }

    pub async fn save_settings(&self, settings: RetentionSettings) -> anyhow::Result<()> {
        // Reject contradictory limits before they reach persistence.
        settings.to_policy().map_err(anyhow::Error::from)?;
        let store = self
            .settings
            .as_ref()
            .context("no settings store configured")?;
        store.save_retention_settings(settings).await
    }
}
