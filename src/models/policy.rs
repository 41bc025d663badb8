use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::CoreError;
use crate::models::backup::Backup;
use crate::models::report::{DeletionCandidate, DeletionReason, EvaluationIssue, EvaluationResult};

/// Limits applied by a retention policy. All limits are optional; a policy
/// with none set is a validated no-op.
#[derive(Debug, Clone)]
pub struct PolicyLimits {
    pub max_size_bytes: Option<u64>,
    pub max_age: Option<Duration>,
    pub max_count: Option<usize>,
    /// Newest backups that must never be deleted, overriding all limits.
    pub preserve_recent: usize,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: None,
            max_age: None,
            max_count: None,
            preserve_recent: 1,
        }
    }
}

/// An immutable, validated retention rule set.
///
/// Construction fails fast on contradictory limits; evaluation afterwards
/// is pure and infallible, reporting per-entry problems as structured
/// issues rather than errors.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    label: String,
    max_size_bytes: Option<u64>,
    max_age: Option<Duration>,
    max_count: Option<usize>,
    preserve_recent: usize,
}

impl RetentionPolicy {
    pub fn new(label: impl Into<String>, limits: PolicyLimits) -> Result<Self, CoreError> {
        let label = label.into();

        if limits.preserve_recent < 1 {
            return Err(CoreError::InvalidPolicy(format!(
                "policy '{label}': preserve_recent must be at least 1"
            )));
        }
        if let Some(max_count) = limits.max_count {
            if max_count < 1 {
                return Err(CoreError::InvalidPolicy(format!(
                    "policy '{label}': max_count must be at least 1"
                )));
            }
            if limits.preserve_recent >= max_count {
                return Err(CoreError::InvalidPolicy(format!(
                    "policy '{label}': preserve_recent ({}) must be smaller than max_count ({max_count})",
                    limits.preserve_recent
                )));
            }
        }
        if let Some(max_age) = limits.max_age {
            if max_age <= Duration::zero() {
                return Err(CoreError::InvalidPolicy(format!(
                    "policy '{label}': max_age must be positive"
                )));
            }
        }

        Ok(Self {
            label,
            max_size_bytes: limits.max_size_bytes,
            max_age: limits.max_age,
            max_count: limits.max_count,
            preserve_recent: limits.preserve_recent,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn preserve_recent(&self) -> usize {
        self.preserve_recent
    }

    /// Whether any of the three limits is set.
    pub fn is_active(&self) -> bool {
        self.max_size_bytes.is_some() || self.max_age.is_some() || self.max_count.is_some()
    }

    /// Evaluate this policy against a backup list as of now.
    pub fn evaluate_backups(&self, backups: &[Backup]) -> EvaluationResult {
        self.evaluate_at(Utc::now(), backups)
    }

    /// Evaluate with an explicit reference time.
    pub fn evaluate_at(&self, now: DateTime<Utc>, backups: &[Backup]) -> EvaluationResult {
        let mut result = EvaluationResult::default();
        if backups.is_empty() {
            return result;
        }

        // Boundary validation: malformed entries are quarantined, never
        // silently kept or deleted.
        let mut valid: Vec<Backup> = Vec::with_capacity(backups.len());
        for backup in backups {
            match backup.validate() {
                Ok(()) => valid.push(backup.clone()),
                Err(e) => result.errors.push(EvaluationIssue {
                    backup: Some(backup.name.clone()),
                    policy: Some(self.label.clone()),
                    message: e.to_string(),
                }),
            }
        }

        result.evaluated = valid.len();
        result.remaining = valid.len();
        if valid.is_empty() {
            return result;
        }

        if !self.is_active() {
            result.warnings.push(format!(
                "policy '{}' has no active limits; nothing will be deleted",
                self.label
            ));
            return result;
        }

        // Newest first; ties keep the caller's relative order.
        valid.sort_by(|a, b| b.effective_created_at().cmp(&a.effective_created_at()));

        let mut reasons: HashMap<String, Vec<DeletionReason>> = HashMap::new();
        let mut mark = |name: &str, reason: DeletionReason| {
            let entry = reasons.entry(name.to_string()).or_default();
            if !entry.contains(&reason) {
                entry.push(reason);
            }
        };

        // Size: walk oldest toward the preserve floor until under the limit.
        if let Some(max_size) = self.max_size_bytes {
            let mut total: u64 = valid.iter().map(Backup::size_bytes).sum();
            if total > max_size {
                for backup in valid.iter().skip(self.preserve_recent).rev() {
                    if total <= max_size {
                        break;
                    }
                    mark(&backup.name, DeletionReason::Size);
                    total = total.saturating_sub(backup.size_bytes());
                }
            }
        }

        // Age: position-independent; the preserve floor is applied below.
        if let Some(max_age) = self.max_age {
            for backup in &valid {
                if let Some(created) = backup.effective_created_at() {
                    if now - created > max_age {
                        mark(&backup.name, DeletionReason::Age);
                    }
                }
            }
        }

        // Count: drop the oldest excess entries.
        if let Some(max_count) = self.max_count {
            if valid.len() > max_count {
                let start = max_count.max(self.preserve_recent);
                for backup in valid.iter().skip(start) {
                    mark(&backup.name, DeletionReason::Count);
                }
            }
        }

        // Absolute floor: the preserve_recent newest are untouchable even
        // where the size/age maths selected them.
        for protected in valid.iter().take(self.preserve_recent) {
            reasons.remove(&protected.name);
        }

        // Emit candidates oldest-first (deletion order).
        for backup in valid.iter().rev() {
            if let Some(backup_reasons) = reasons.remove(&backup.name) {
                for reason in &backup_reasons {
                    match reason {
                        DeletionReason::Size => result.details.size += 1,
                        DeletionReason::Age => result.details.age += 1,
                        DeletionReason::Count => result.details.count += 1,
                    }
                }
                result.to_delete.push(DeletionCandidate {
                    backup: backup.clone(),
                    reasons: backup_reasons,
                    policies: vec![self.label.clone()],
                });
            }
        }

        result.remaining = result.evaluated - result.to_delete.len();
        if result.remaining == 0 {
            result
                .warnings
                .push(format!("policy '{}' would delete every backup", self.label));
        }

        result
    }
}
