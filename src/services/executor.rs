use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::backend::BackupBackend;
use crate::config::CoreConfig;
use crate::error::is_transient_error;
use crate::models::backup::Backup;
use crate::models::policy::RetentionPolicy;
use crate::models::report::{
    DeletionCandidate, DeletionOutcome, DeletionReason, EvaluationResult, ExecutionReport,
    FailedDeletion,
};

/// Union fraction above which a combined deletion set is flagged.
const HIGH_IMPACT_RATIO: f64 = 0.9;
/// Flag when more than this many backups would be reduced to this floor.
const LOW_REMAINING_THRESHOLD: usize = 2;
const LOW_REMAINING_MIN_TOTAL: usize = 5;

/// Confirmation port: shown the evaluation, returns whether to proceed.
pub type ConfirmFn = Arc<dyn Fn(&EvaluationResult) -> bool + Send + Sync>;

/// Structured progress events emitted during cleanup.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CleanupEvent {
    #[serde(rename_all = "camelCase")]
    Started { path: String, candidates: usize },
    #[serde(rename_all = "camelCase")]
    BatchStarted { index: usize, size: usize },
    #[serde(rename_all = "camelCase")]
    Deleted {
        name: String,
        size: u64,
        retry_count: u32,
        dry_run: bool,
    },
    #[serde(rename_all = "camelCase")]
    DeleteFailed { name: String, error: String },
    #[serde(rename_all = "camelCase")]
    Finished {
        deleted: usize,
        failed: usize,
        space_saved: u64,
        cancelled: bool,
    },
}

/// Options for one cleanup run.
#[derive(Default)]
pub struct CleanupOptions {
    /// Simulate deletions instead of performing them.
    pub dry_run: bool,
    /// Asked once before any deletion; declining cancels the run.
    pub confirm: Option<ConfirmFn>,
    /// Receiver for progress events, if the caller wants them.
    pub progress: Option<mpsc::UnboundedSender<CleanupEvent>>,
}

/// Evaluates retention policies against live backup lists and carries out
/// the resulting deletions in retrying batches.
pub struct PolicyExecutor {
    backend: Arc<dyn BackupBackend>,
    config: CoreConfig,
}

impl PolicyExecutor {
    pub fn new(backend: Arc<dyn BackupBackend>, config: CoreConfig) -> Self {
        Self { backend, config }
    }

    /// Evaluate several policies and resolve conflicts by union of most
    /// restrictive: a backup is deleted if any policy selects it.
    ///
    /// Policies are evaluated independently; problems in one are recorded
    /// and do not abort the others. Combined counts are recomputed from
    /// the union, not summed across policies.
    pub fn evaluate_multiple_policies(
        backups: &[Backup],
        policies: &[RetentionPolicy],
    ) -> EvaluationResult {
        let mut combined = EvaluationResult::default();
        if policies.is_empty() {
            combined.evaluated = backups.iter().filter(|b| b.validate().is_ok()).count();
            combined.remaining = combined.evaluated;
            combined
                .warnings
                .push("no retention policies supplied; nothing will be deleted".into());
            return combined;
        }

        // Union keyed by backup name, in first-seen (oldest-first) order.
        let mut order: Vec<String> = Vec::new();
        let mut union: HashMap<String, DeletionCandidate> = HashMap::new();

        for policy in policies {
            let result = policy.evaluate_backups(backups);
            combined.evaluated = combined.evaluated.max(result.evaluated);

            for issue in result.errors {
                // Each policy validates the same input; keep one copy of
                // each per-backup validation issue.
                let duplicate = combined
                    .errors
                    .iter()
                    .any(|e| e.backup == issue.backup && e.message == issue.message);
                if !duplicate {
                    combined.errors.push(issue);
                }
            }
            combined.warnings.extend(result.warnings);

            for candidate in result.to_delete {
                match union.get_mut(&candidate.backup.name) {
                    Some(existing) => {
                        for reason in candidate.reasons {
                            if !existing.reasons.contains(&reason) {
                                existing.reasons.push(reason);
                            }
                        }
                        for label in candidate.policies {
                            if !existing.policies.contains(&label) {
                                existing.policies.push(label);
                            }
                        }
                    }
                    None => {
                        order.push(candidate.backup.name.clone());
                        union.insert(candidate.backup.name.clone(), candidate);
                    }
                }
            }
        }

        for name in order {
            if let Some(candidate) = union.remove(&name) {
                for reason in &candidate.reasons {
                    match reason {
                        DeletionReason::Size => combined.details.size += 1,
                        DeletionReason::Age => combined.details.age += 1,
                        DeletionReason::Count => combined.details.count += 1,
                    }
                }
                combined.to_delete.push(candidate);
            }
        }

        combined.remaining = combined.evaluated.saturating_sub(combined.to_delete.len());

        if combined.evaluated > 0 {
            let ratio = combined.to_delete.len() as f64 / combined.evaluated as f64;
            if ratio >= HIGH_IMPACT_RATIO {
                combined.warnings.push(format!(
                    "combined policies would remove {} of {} backups",
                    combined.to_delete.len(),
                    combined.evaluated
                ));
            }
            if combined.evaluated > LOW_REMAINING_MIN_TOTAL
                && combined.remaining <= LOW_REMAINING_THRESHOLD
            {
                combined.warnings.push(format!(
                    "only {} of {} backups would remain after cleanup",
                    combined.remaining, combined.evaluated
                ));
            }
        }

        combined
    }

    /// Fetch the live backup list for `path`, evaluate `policies` and
    /// delete the resulting candidates in batches.
    ///
    /// Deletion failures never abort the run; they are aggregated into the
    /// report. Only the initial listing, where nothing has happened yet,
    /// can fail this call.
    pub async fn execute_retention_cleanup(
        &self,
        path: &str,
        policies: &[RetentionPolicy],
        options: CleanupOptions,
    ) -> anyhow::Result<ExecutionReport> {
        let started = Instant::now();
        let backups = self.backend.list_backups(path).await?;
        let evaluation = Self::evaluate_multiple_policies(&backups, policies);

        let mut report = ExecutionReport::new(path, options.dry_run, evaluation);
        let candidates = report.evaluation.to_delete.clone();

        if candidates.is_empty() {
            report.execution_time_ms = started.elapsed().as_millis() as u64;
            tracing::info!(path = %path, "retention cleanup: nothing to delete");
            return Ok(report);
        }

        if let Some(confirm) = &options.confirm {
            if !confirm(&report.evaluation) {
                report.cancelled = true;
                report.execution_time_ms = started.elapsed().as_millis() as u64;
                emit(&options.progress, CleanupEvent::Finished {
                    deleted: 0,
                    failed: 0,
                    space_saved: 0,
                    cancelled: true,
                });
                tracing::info!(path = %path, "retention cleanup cancelled by confirmation");
                return Ok(report);
            }
        }

        emit(&options.progress, CleanupEvent::Started {
            path: path.to_string(),
            candidates: candidates.len(),
        });

        for (index, batch) in candidates.chunks(self.config.deletion_batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            emit(&options.progress, CleanupEvent::BatchStarted {
                index,
                size: batch.len(),
            });

            let outcomes = futures_util::future::join_all(
                batch
                    .iter()
                    .map(|candidate| self.delete_with_retry(path, candidate, options.dry_run)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(deleted) => {
                        report.space_saved += deleted.size;
                        emit(&options.progress, CleanupEvent::Deleted {
                            name: deleted.name.clone(),
                            size: deleted.size,
                            retry_count: deleted.retry_count,
                            dry_run: deleted.dry_run,
                        });
                        report.deleted_backups.push(deleted);
                    }
                    Err(failed) => {
                        emit(&options.progress, CleanupEvent::DeleteFailed {
                            name: failed.name.clone(),
                            error: failed.error.clone(),
                        });
                        report.failed_deletions.push(failed);
                    }
                }
            }
        }

        report.execution_time_ms = started.elapsed().as_millis() as u64;
        emit(&options.progress, CleanupEvent::Finished {
            deleted: report.deleted_backups.len(),
            failed: report.failed_deletions.len(),
            space_saved: report.space_saved,
            cancelled: false,
        });
        tracing::info!(
            path = %path,
            deleted = report.deleted_backups.len(),
            failed = report.failed_deletions.len(),
            space_saved = report.space_saved,
            dry_run = report.dry_run,
            "retention cleanup finished"
        );
        Ok(report)
    }

    async fn delete_with_retry(
        &self,
        path: &str,
        candidate: &DeletionCandidate,
        dry_run: bool,
    ) -> Result<DeletionOutcome, FailedDeletion> {
        let name = &candidate.backup.name;
        let size = candidate.backup.size_bytes();

        if dry_run {
            tracing::info!(path = %path, backup = %name, size, "dry run: would delete backup");
            return Ok(DeletionOutcome {
                name: name.clone(),
                size,
                retry_count: 0,
                dry_run: true,
            });
        }

        let mut retry_count = 0u32;
        loop {
            match self.backend.delete_backup(path, name).await {
                Ok(()) => {
                    tracing::info!(path = %path, backup = %name, size, retry_count, "deleted backup");
                    return Ok(DeletionOutcome {
                        name: name.clone(),
                        size,
                        retry_count,
                        dry_run: false,
                    });
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    let transient = is_transient_error(&message);
                    if transient && retry_count < self.config.max_delete_retries {
                        retry_count += 1;
                        let delay = self.config.retry_base_delay * retry_count;
                        tracing::warn!(
                            path = %path,
                            backup = %name,
                            error = %message,
                            retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "transient deletion failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    tracing::error!(path = %path, backup = %name, error = %message, "deletion failed");
                    return Err(FailedDeletion {
                        name: name.clone(),
                        error: message,
                        attempts: retry_count + 1,
                        transient,
                    });
                }
            }
        }
    }
}

fn emit(progress: &Option<mpsc::UnboundedSender<CleanupEvent>>, event: CleanupEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::PolicyLimits;
    use chrono::{Duration, Utc};

    const GB: u64 = 1024 * 1024 * 1024;

    fn backup(name: &str, age_days: i64, size: u64) -> Backup {
        Backup::new(name, Some(size), Utc::now() - Duration::days(age_days))
    }

    fn age_policy(days: i64) -> RetentionPolicy {
        RetentionPolicy::new(
            "age",
            PolicyLimits {
                max_age: Some(Duration::days(days)),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn count_policy(max: usize) -> RetentionPolicy {
        RetentionPolicy::new(
            "count",
            PolicyLimits {
                max_count: Some(max),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn size_policy(max_bytes: u64) -> RetentionPolicy {
        RetentionPolicy::new(
            "size",
            PolicyLimits {
                max_size_bytes: Some(max_bytes),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn union_combines_policy_selections() {
        // The age policy selects {C}; the size policy selects {B, C};
        // the union is {B, C} and A remains.
        let backups = vec![
            backup("A", 2, 5 * GB),
            backup("B", 10, 5 * GB),
            backup("C", 40, 5 * GB),
        ];
        let policies = vec![age_policy(30), size_policy(5 * GB)];

        let result = PolicyExecutor::evaluate_multiple_policies(&backups, &policies);
        let mut names = result.deletion_names();
        names.sort();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(result.remaining, 1);

        // C was selected by both policies; its candidate carries both labels.
        let c = result.to_delete.iter().find(|c| c.backup.name == "C").unwrap();
        assert!(c.policies.contains(&"age".to_string()));
        assert!(c.policies.contains(&"size".to_string()));
    }

    #[test]
    fn union_is_a_superset_of_each_policy() {
        let backups: Vec<Backup> =
            (0..10).map(|i| backup(&format!("b{i}"), i * 7, GB)).collect();
        let policies = vec![age_policy(21), count_policy(6)];

        let combined = PolicyExecutor::evaluate_multiple_policies(&backups, &policies);
        let combined_names: Vec<&str> = combined.deletion_names();

        for policy in &policies {
            let single = policy.evaluate_backups(&backups);
            for name in single.deletion_names() {
                assert!(
                    combined_names.contains(&name),
                    "union is missing '{name}' selected by '{}'",
                    policy.label()
                );
            }
        }
    }

    #[test]
    fn combined_counts_come_from_the_union() {
        // Both policies select the same single backup; the union counts it once.
        let backups = vec![backup("A", 1, GB), backup("B", 10, GB), backup("C", 50, GB)];
        let policies = vec![age_policy(40), count_policy(2)];

        let result = PolicyExecutor::evaluate_multiple_policies(&backups, &policies);
        assert_eq!(result.to_delete.len(), 1);
        assert_eq!(result.deletion_names(), vec!["C"]);
        assert_eq!(result.details.age, 1);
        assert_eq!(result.details.count, 1);
    }

    #[test]
    fn warns_when_few_backups_would_remain() {
        let backups: Vec<Backup> = (0..8).map(|i| backup(&format!("b{i}"), i, GB)).collect();
        let result =
            PolicyExecutor::evaluate_multiple_policies(&backups, &[count_policy(2)]);

        assert_eq!(result.remaining, 2);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("would remain after cleanup")));
    }

    #[test]
    fn warns_on_high_impact_union() {
        // 9 of 10 selected by age: at the 90% threshold.
        let mut backups: Vec<Backup> =
            (0..9).map(|i| backup(&format!("old{i}"), 100 + i, GB)).collect();
        backups.insert(0, backup("new", 0, GB));

        let result = PolicyExecutor::evaluate_multiple_policies(&backups, &[age_policy(30)]);
        assert_eq!(result.to_delete.len(), 9);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("would remove 9 of 10")));
    }

    #[test]
    fn no_policies_yields_warning_and_empty_set() {
        let backups = vec![backup("A", 1, GB)];
        let result = PolicyExecutor::evaluate_multiple_policies(&backups, &[]);
        assert!(result.to_delete.is_empty());
        assert_eq!(result.remaining, 1);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn validation_issues_are_not_duplicated_across_policies() {
        let backups = vec![
            backup("good", 1, GB),
            Backup {
                name: "broken".into(),
                size: None,
                created_at: None,
                modified_at: None,
            },
        ];
        let result = PolicyExecutor::evaluate_multiple_policies(
            &backups,
            &[age_policy(30), count_policy(5)],
        );
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn empty_input_produces_no_ratio_warnings() {
        let result = PolicyExecutor::evaluate_multiple_policies(&[], &[count_policy(3)]);
        assert!(result.to_delete.is_empty());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }
}
