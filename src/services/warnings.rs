use chrono::{Duration, Utc};
use serde::Serialize;

use crate::models::backup::Backup;
use crate::models::report::DeletionCandidate;
use crate::models::settings::RetentionSettings;

const USAGE_INFO_RATIO: f64 = 0.75;
const USAGE_WARN_RATIO: f64 = 0.9;
/// Suggest enabling retention once this many backups accumulate.
const UNMANAGED_BACKUP_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Error,
}

/// A severity-graded, human-facing warning about retention state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionWarning {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl RetentionWarning {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            recommendation: None,
        }
    }

    fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Side-effect-free projection of what a cleanup run would do.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPreview {
    pub total_backups: usize,
    pub total_size: u64,
    pub to_delete: Vec<DeletionCandidate>,
    pub space_to_free: u64,
    pub remaining_backups: usize,
    pub remaining_size: u64,
    pub warnings: Vec<RetentionWarning>,
}

/// Derive severity-graded warnings from the current backup list and the
/// operator's retention settings. Hard-limit breaches are CRITICAL;
/// structurally risky configurations are WARNING-level recommendations.
/// Never mutates input and never deletes anything.
pub fn analyze_retention_warnings(
    backups: &[Backup],
    settings: &RetentionSettings,
) -> Vec<RetentionWarning> {
    let mut warnings = Vec::new();
    if backups.is_empty() {
        return warnings;
    }

    let invalid = backups.iter().filter(|b| b.validate().is_err()).count();
    if invalid > 0 {
        warnings.push(RetentionWarning::new(
            Severity::Error,
            format!("{invalid} backup entries are malformed and excluded from retention"),
        ));
    }

    let valid: Vec<&Backup> = backups.iter().filter(|b| b.validate().is_ok()).collect();
    if valid.is_empty() {
        return warnings;
    }

    if !settings.enabled {
        if valid.len() >= UNMANAGED_BACKUP_THRESHOLD {
            warnings.push(
                RetentionWarning::new(
                    Severity::Warning,
                    format!("{} backups accumulated with retention disabled", valid.len()),
                )
                .with_recommendation("enable a retention policy to bound storage growth"),
            );
        }
        return warnings;
    }

    if !settings.has_limits() {
        warnings.push(
            RetentionWarning::new(
                Severity::Warning,
                "retention is enabled but no size, age or count limit is set",
            )
            .with_recommendation("configure at least one limit or disable retention"),
        );
        return warnings;
    }

    let total_size: u64 = valid.iter().map(|b| b.size_bytes()).sum();

    if let Some(max_size) = settings.max_size_bytes {
        push_usage_warning(
            &mut warnings,
            total_size as f64,
            max_size as f64,
            &format!("storage usage ({total_size} bytes) against the {max_size}-byte limit"),
        );
    }

    if let Some(max_count) = settings.max_count {
        push_usage_warning(
            &mut warnings,
            valid.len() as f64,
            max_count as f64,
            &format!("backup count ({}) against the limit of {max_count}", valid.len()),
        );
    }

    if let Some(max_age_days) = settings.max_age_days {
        let now = Utc::now();
        let max_age = Duration::days(max_age_days as i64);
        let expired = valid
            .iter()
            .filter(|b| {
                b.effective_created_at()
                    .map(|created| now - created > max_age)
                    .unwrap_or(false)
            })
            .count();
        if expired > 0 {
            warnings.push(RetentionWarning::new(
                Severity::Critical,
                format!("{expired} backups are older than the {max_age_days}-day age limit"),
            ));
        }
    }

    // Structural risk: the configured policy would cut the set down to a
    // handful of survivors.
    match settings.to_policy() {
        Ok(Some(policy)) => {
            let result = policy.evaluate_backups(backups);
            if result.evaluated > 5 && result.remaining <= 2 {
                warnings.push(
                    RetentionWarning::new(
                        Severity::Warning,
                        format!(
                            "current settings would leave only {} of {} backups",
                            result.remaining, result.evaluated
                        ),
                    )
                    .with_recommendation("loosen the limits or raise preserveRecent"),
                );
            }
        }
        Ok(None) => {}
        Err(e) => {
            warnings.push(RetentionWarning::new(
                Severity::Error,
                format!("retention settings are contradictory: {e}"),
            ));
        }
    }

    warnings
}

/// Preview the effect of the configured retention settings without
/// performing any deletion.
pub fn generate_retention_preview(
    backups: &[Backup],
    settings: &RetentionSettings,
) -> RetentionPreview {
    let valid: Vec<&Backup> = backups.iter().filter(|b| b.validate().is_ok()).collect();
    let total_size: u64 = valid.iter().map(|b| b.size_bytes()).sum();

    let to_delete = match settings.to_policy() {
        Ok(Some(policy)) => policy.evaluate_backups(backups).to_delete,
        Ok(None) | Err(_) => Vec::new(),
    };
    let space_to_free: u64 = to_delete.iter().map(|c| c.backup.size_bytes()).sum();

    RetentionPreview {
        total_backups: valid.len(),
        total_size,
        remaining_backups: valid.len() - to_delete.len(),
        remaining_size: total_size.saturating_sub(space_to_free),
        space_to_free,
        to_delete,
        warnings: analyze_retention_warnings(backups, settings),
    }
}

fn push_usage_warning(warnings: &mut Vec<RetentionWarning>, used: f64, limit: f64, what: &str) {
    if limit <= 0.0 {
        return;
    }
    let ratio = used / limit;
    if ratio > 1.0 {
        warnings.push(RetentionWarning::new(
            Severity::Critical,
            format!("limit exceeded: {what}"),
        ));
    } else if ratio >= USAGE_WARN_RATIO {
        warnings.push(RetentionWarning::new(
            Severity::Warning,
            format!("approaching limit: {what}"),
        ));
    } else if ratio >= USAGE_INFO_RATIO {
        warnings.push(RetentionWarning::new(
            Severity::Info,
            format!("usage above 75%: {what}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn backup(name: &str, age_days: i64, size: u64) -> Backup {
        Backup::new(name, Some(size), Utc::now() - Duration::days(age_days))
    }

    fn settings(max_size: Option<u64>, max_age: Option<u32>, max_count: Option<usize>) -> RetentionSettings {
        RetentionSettings {
            enabled: true,
            max_size_bytes: max_size,
            max_age_days: max_age,
            max_count,
            preserve_recent: 1,
        }
    }

    #[test]
    fn empty_list_produces_no_warnings() {
        let warnings = analyze_retention_warnings(&[], &settings(Some(GB), None, None));
        assert!(warnings.is_empty());
    }

    #[test]
    fn size_breach_is_critical() {
        let backups = vec![backup("a", 1, 6 * GB), backup("b", 2, 6 * GB)];
        let warnings = analyze_retention_warnings(&backups, &settings(Some(10 * GB), None, None));
        assert!(warnings.iter().any(|w| w.severity == Severity::Critical));
    }

    #[test]
    fn near_limit_is_warning_not_critical() {
        let backups = vec![backup("a", 1, 9 * GB)];
        let warnings = analyze_retention_warnings(&backups, &settings(Some(10 * GB), None, None));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Warning);
    }

    #[test]
    fn expired_backups_are_critical() {
        let backups = vec![backup("old", 60, GB), backup("new", 1, GB)];
        let warnings = analyze_retention_warnings(&backups, &settings(None, Some(30), None));
        assert!(warnings
            .iter()
            .any(|w| w.severity == Severity::Critical && w.message.contains("older than")));
    }

    #[test]
    fn disabled_retention_with_many_backups_warns() {
        let backups: Vec<Backup> = (0..12).map(|i| backup(&format!("b{i}"), i, GB)).collect();
        let warnings = analyze_retention_warnings(&backups, &RetentionSettings::default());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert!(warnings[0].recommendation.is_some());
    }

    #[test]
    fn disabled_retention_with_few_backups_is_quiet() {
        let backups = vec![backup("a", 1, GB)];
        let warnings = analyze_retention_warnings(&backups, &RetentionSettings::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn enabled_without_limits_warns() {
        let backups = vec![backup("a", 1, GB)];
        let warnings = analyze_retention_warnings(&backups, &settings(None, None, None));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("no size, age or count limit"));
    }

    #[test]
    fn aggressive_policy_flags_low_survivor_count() {
        let backups: Vec<Backup> = (0..8).map(|i| backup(&format!("b{i}"), i, GB)).collect();
        let warnings = analyze_retention_warnings(&backups, &settings(None, None, Some(2)));
        assert!(warnings
            .iter()
            .any(|w| w.severity == Severity::Warning && w.message.contains("leave only")));
    }

    #[test]
    fn malformed_entries_surface_as_error() {
        let backups = vec![
            backup("ok", 1, GB),
            Backup {
                name: "".into(),
                size: None,
                created_at: None,
                modified_at: None,
            },
        ];
        let warnings = analyze_retention_warnings(&backups, &settings(Some(100 * GB), None, None));
        assert!(warnings.iter().any(|w| w.severity == Severity::Error));
    }

    #[test]
    fn preview_reports_space_and_survivors() {
        let backups = vec![backup("a", 1, 5 * GB), backup("b", 10, 5 * GB), backup("c", 40, 5 * GB)];
        let preview = generate_retention_preview(&backups, &settings(None, Some(30), None));

        assert_eq!(preview.total_backups, 3);
        assert_eq!(preview.total_size, 15 * GB);
        assert_eq!(preview.to_delete.len(), 1);
        assert_eq!(preview.to_delete[0].backup.name, "c");
        assert_eq!(preview.space_to_free, 5 * GB);
        assert_eq!(preview.remaining_backups, 2);
        assert_eq!(preview.remaining_size, 10 * GB);
    }

    #[test]
    fn preview_with_disabled_settings_deletes_nothing() {
        let backups = vec![backup("a", 100, GB)];
        let preview = generate_retention_preview(&backups, &RetentionSettings::default());
        assert!(preview.to_delete.is_empty());
        assert_eq!(preview.remaining_backups, 1);
    }
}
