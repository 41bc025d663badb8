use serde::Serialize;

use crate::models::backup::Backup;

/// Which retention rule selected a backup for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionReason {
    Size,
    Age,
    Count,
}

/// A backup selected for deletion, with the rule(s) that triggered it and
/// the label(s) of the policies that contributed it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionCandidate {
    pub backup: Backup,
    pub reasons: Vec<DeletionReason>,
    pub policies: Vec<String>,
}

/// A non-fatal problem recorded during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub message: String,
}

/// Deletion-candidate counts per violation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationCounts {
    pub size: usize,
    pub age: usize,
    pub count: usize,
}

/// Outcome of evaluating one or more retention policies against a backup
/// list. Always returned fully populated, with empty `errors`/`warnings`
/// on complete success.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub to_delete: Vec<DeletionCandidate>,
    pub errors: Vec<EvaluationIssue>,
    pub warnings: Vec<String>,
    pub details: ViolationCounts,
    /// Number of valid backups that took part in evaluation.
    pub evaluated: usize,
    /// Number of valid backups that would remain after deletion.
    pub remaining: usize,
}

impl EvaluationResult {
    /// Names in the deletion set, in deletion (oldest-first) order.
    pub fn deletion_names(&self) -> Vec<&str> {
        self.to_delete.iter().map(|c| c.backup.name.as_str()).collect()
    }
}

/// A successfully processed deletion (real or simulated).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionOutcome {
    pub name: String,
    pub size: u64,
    pub retry_count: u32,
    pub dry_run: bool,
}

/// A deletion that exhausted its attempts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDeletion {
    pub name: String,
    pub error: String,
    pub attempts: u32,
    pub transient: bool,
}

/// Result of one `execute_retention_cleanup` call. Partial completion is an
/// accepted outcome: failures are aggregated here, never thrown mid-batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub id: String,
    pub path: String,
    pub deleted_backups: Vec<DeletionOutcome>,
    pub failed_deletions: Vec<FailedDeletion>,
    pub space_saved: u64,
    pub execution_time_ms: u64,
    pub dry_run: bool,
    pub cancelled: bool,
    pub evaluation: EvaluationResult,
}

impl ExecutionReport {
    pub(crate) fn new(path: &str, dry_run: bool, evaluation: EvaluationResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string(),
            deleted_backups: Vec::new(),
            failed_deletions: Vec::new(),
            space_saved: 0,
            execution_time_ms: 0,
            dry_run,
            cancelled: false,
            evaluation,
        }
    }
}
