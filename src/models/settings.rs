use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::policy::{PolicyLimits, RetentionPolicy};

/// Operator-facing retention configuration, persisted by the embedder's
/// settings store and rendered by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
}

fn default_preserve_recent() -> usize {
    1
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size_bytes: None,
            max_age_days: None,
            max_count: None,
            preserve_recent: 1,
        }
    }
}

impl RetentionSettings {
    pub fn has_limits(&self) -> bool {
        self.max_size_bytes.is_some() || self.max_age_days.is_some() || self.max_count.is_some()
    }

    /// Build the policy these settings describe.
    ///
    /// Returns `Ok(None)` when retention is disabled or no limit is set;
    /// contradictory limits surface as `CoreError::InvalidPolicy`.
    pub fn to_policy(&self) -> Result<Option<RetentionPolicy>, CoreError> {
        if !self.enabled || !self.has_limits() {
            return Ok(None);
        }
        let policy = RetentionPolicy::new(
            "settings",
            PolicyLimits {
                max_size_bytes: self.max_size_bytes,
                max_age: self.max_age_days.map(|d| Duration::days(d as i64)),
                max_count: self.max_count,
                preserve_recent: self.preserve_recent,
            },
        )?;
        Ok(Some(policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_settings_produce_no_policy() {
        let settings = RetentionSettings {
            max_count: Some(5),
            ..Default::default()
        };
        assert!(settings.to_policy().unwrap().is_none());
    }

    #[test]
    fn enabled_settings_build_a_policy() {
        let settings = RetentionSettings {
            enabled: true,
            max_count: Some(5),
            preserve_recent: 2,
            ..Default::default()
        };
        let policy = settings.to_policy().unwrap().unwrap();
        assert!(policy.is_active());
        assert_eq!(policy.preserve_recent(), 2);
    }

    #[test]
    fn contradictory_settings_fail() {
        let settings = RetentionSettings {
            enabled: true,
            max_count: Some(2),
            preserve_recent: 3,
            ..Default::default()
        };
        assert!(settings.to_policy().is_err());
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let settings: RetentionSettings =
            serde_json::from_str(r#"{"enabled":true,"maxAgeDays":30}"#).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.max_age_days, Some(30));
        assert_eq!(settings.preserve_recent, 1);
    }
}
