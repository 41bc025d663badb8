use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::backend::BackupBackend;
use crate::models::backup::Backup;
use crate::services::size_cache::SizeCache;
use crate::services::task_queue::{BackgroundTaskQueue, TaskPriority};

/// Names that changed between the last snapshot and the current listing.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

/// Result of a size computation for one tracked path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeComputation {
    pub total_size: u64,
    /// Current backups, newest first, with sizes resolved.
    pub backups: Vec<Backup>,
    /// True when the total was derived from a previous snapshot rather
    /// than measured from scratch.
    pub incremental: bool,
    pub changes: ChangeSet,
}

/// Last fully resolved state for a tracked path.
///
/// Kept separately from the TTL'd cache so that diffing stays incremental
/// across cache expiry. Replaced wholesale under the per-path guard.
#[derive(Debug, Clone)]
struct TrackedPathSnapshot {
    backups: Vec<Backup>,
    total_size: u64,
    observed_at: DateTime<Utc>,
}

/// Computes per-path storage totals by diffing backup listings against the
/// last known snapshot, querying the size oracle only for added or changed
/// artifacts.
pub struct IncrementalSizeTracker {
    backend: Arc<dyn BackupBackend>,
    cache: Arc<SizeCache<SizeComputation>>,
    queue: Arc<BackgroundTaskQueue>,
    snapshots: DashMap<String, TrackedPathSnapshot>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    batch_size: usize,
}

impl IncrementalSizeTracker {
    pub fn new(
        backend: Arc<dyn BackupBackend>,
        cache: Arc<SizeCache<SizeComputation>>,
        queue: Arc<BackgroundTaskQueue>,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            cache,
            queue,
            snapshots: DashMap::new(),
            inflight: DashMap::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Compute the total size of `current` for `path`.
    ///
    /// Per-path computations are single-flight: concurrent callers for the
    /// same path serialize on a guard, and late arrivals observe the first
    /// caller's result through the cache instead of recomputing. A failed
    /// oracle lookup for one backup falls back to its previously known
    /// size (then the caller-supplied size) and never aborts the whole
    /// computation.
    pub async fn calculate_total_size(
        &self,
        path: &str,
        current: &[Backup],
        force_refresh: bool,
    ) -> anyhow::Result<SizeComputation> {
        let guard = self
            .inflight
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _held = guard.lock().await;

        if !force_refresh {
            if let Some(hit) = self.cache.get(path) {
                tracing::debug!(path = %path, total_size = hit.total_size, "size cache hit");
                return Ok(hit);
            }
        }

        let previous = self.snapshots.get(path).map(|s| s.value().clone());
        if let Some(snapshot) = &previous {
            tracing::debug!(
                path = %path,
                last_observed = %snapshot.observed_at,
                "diffing against previous snapshot"
            );
        }
        let computation = self.compute(path, current, previous).await;

        self.snapshots.insert(
            path.to_string(),
            TrackedPathSnapshot {
                backups: computation.backups.clone(),
                total_size: computation.total_size,
                observed_at: Utc::now(),
            },
        );
        self.cache.set(path, computation.clone());

        tracing::info!(
            path = %path,
            total_size = computation.total_size,
            added = computation.changes.added.len(),
            removed = computation.changes.removed.len(),
            changed = computation.changes.changed.len(),
            incremental = computation.incremental,
            "size computation complete"
        );
        Ok(computation)
    }

    /// Drop cached state for a path (both the TTL cache entry and the
    /// diffing snapshot).
    pub fn invalidate(&self, path: &str) {
        self.cache.delete(path);
        self.snapshots.remove(path);
    }

    async fn compute(
        &self,
        path: &str,
        current: &[Backup],
        previous: Option<TrackedPathSnapshot>,
    ) -> SizeComputation {
        let previous_sizes: HashMap<String, u64> = previous
            .as_ref()
            .map(|snapshot| {
                snapshot
                    .backups
                    .iter()
                    .map(|b| (b.name.clone(), b.size_bytes()))
                    .collect()
            })
            .unwrap_or_default();

        let current_names: HashSet<&str> = current.iter().map(|b| b.name.as_str()).collect();

        let mut changes = ChangeSet::default();
        let mut to_measure: Vec<&Backup> = Vec::new();
        for backup in current {
            match previous_sizes.get(&backup.name) {
                None => {
                    changes.added.push(backup.name.clone());
                    to_measure.push(backup);
                }
                Some(&old_size) => {
                    // A missing caller-supplied size also forces a
                    // re-measure; we cannot tell whether it changed.
                    if backup.size.is_none() || backup.size != Some(old_size) {
                        changes.changed.push(backup.name.clone());
                        to_measure.push(backup);
                    }
                }
            }
        }
        for name in previous_sizes.keys() {
            if !current_names.contains(name.as_str()) {
                changes.removed.push(name.clone());
            }
        }

        let measured = self.measure_batched(path, &to_measure, &previous_sizes).await;

        // Resolve every current backup's size: measured where re-queried,
        // otherwise carried over from the snapshot.
        let mut resolved: Vec<Backup> = current
            .iter()
            .map(|backup| {
                let mut resolved = backup.clone();
                let size = measured
                    .get(&backup.name)
                    .copied()
                    .or_else(|| previous_sizes.get(&backup.name).copied())
                    .or(backup.size)
                    .unwrap_or(0);
                resolved.size = Some(size);
                resolved
            })
            .collect();
        resolved.sort_by(|a, b| b.effective_created_at().cmp(&a.effective_created_at()));

        let resolved_sizes: HashMap<&str, u64> = resolved
            .iter()
            .map(|b| (b.name.as_str(), b.size_bytes()))
            .collect();

        let (total_size, incremental) = match previous {
            Some(snapshot) => {
                let mut total = snapshot.total_size;
                for name in &changes.removed {
                    total = total.saturating_sub(previous_sizes.get(name).copied().unwrap_or(0));
                }
                for name in &changes.changed {
                    total = total.saturating_sub(previous_sizes.get(name).copied().unwrap_or(0));
                    total += resolved_sizes.get(name.as_str()).copied().unwrap_or(0);
                }
                for name in &changes.added {
                    total += resolved_sizes.get(name.as_str()).copied().unwrap_or(0);
                }
                (total, true)
            }
            None => (resolved.iter().map(Backup::size_bytes).sum(), false),
        };

        debug_assert_eq!(
            total_size,
            resolved.iter().map(Backup::size_bytes).sum::<u64>(),
            "incremental total diverged from from-scratch sum"
        );

        SizeComputation {
            total_size,
            backups: resolved,
            incremental,
            changes,
        }
    }

    /// Query the size oracle for a set of backups, grouped into fixed-size
    /// batches dispatched through the background queue.
    async fn measure_batched(
        &self,
        path: &str,
        backups: &[&Backup],
        previous_sizes: &HashMap<String, u64>,
    ) -> HashMap<String, u64> {
        let mut handles = Vec::new();
        for chunk in backups.chunks(self.batch_size) {
            let backend = self.backend.clone();
            let path = path.to_string();
            let names: Vec<String> = chunk.iter().map(|b| b.name.clone()).collect();
            handles.push(self.queue.add(TaskPriority::Normal, async move {
                let lookups = names.into_iter().map(|name| {
                    let backend = backend.clone();
                    let path = path.clone();
                    async move {
                        let result = backend.measure_backup_size(&path, &name).await;
                        (name, result)
                    }
                });
                futures_util::future::join_all(lookups).await
            }));
        }

        let fallback_for = |name: &str| {
            previous_sizes.get(name).copied().or_else(|| {
                backups
                    .iter()
                    .find(|b| b.name == name)
                    .and_then(|b| b.size)
            })
        };

        let mut measured = HashMap::new();
        for handle in handles {
            match handle.wait().await {
                Ok(results) => {
                    for (name, result) in results {
                        match result {
                            Ok(size) => {
                                measured.insert(name, size);
                            }
                            Err(e) => {
                                let fallback = fallback_for(&name);
                                tracing::warn!(
                                    backup = %name,
                                    error = %e,
                                    fallback = ?fallback,
                                    "size lookup failed, using last known size"
                                );
                                if let Some(size) = fallback {
                                    measured.insert(name, size);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "size lookup batch was dropped");
                }
            }
        }
        measured
    }
}
