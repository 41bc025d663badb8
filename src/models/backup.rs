use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A single backup artifact as reported by the external lister.
///
/// `size` may be absent until the size oracle has measured the artifact.
/// A usable creation timestamp must be derivable from either `created_at`
/// or `modified_at`; entries where neither is present fail validation and
/// are quarantined at the evaluation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Backup {
    pub fn new(name: impl Into<String>, size: Option<u64>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            created_at: Some(created_at),
            modified_at: None,
        }
    }

    /// Creation timestamp, falling back to the modification timestamp.
    pub fn effective_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.modified_at)
    }

    /// Known size in bytes, treating unmeasured artifacts as zero.
    pub fn size_bytes(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    /// Boundary validation; invalid entries are excluded from evaluation.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidBackup("backup name is empty".into()));
        }
        if self.effective_created_at().is_none() {
            return Err(CoreError::InvalidBackup(format!(
                "backup '{}' has no derivable timestamp",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn valid_backup_passes() {
        let b = Backup::new("srv1-2026-08-01", Some(1024), Utc::now());
        assert!(b.validate().is_ok());
        assert_eq!(b.size_bytes(), 1024);
    }

    #[test]
    fn empty_name_rejected() {
        let b = Backup::new("   ", Some(1), Utc::now());
        assert!(b.validate().is_err());
    }

    #[test]
    fn missing_timestamp_rejected() {
        let b = Backup {
            name: "orphan".into(),
            size: Some(1),
            created_at: None,
            modified_at: None,
        };
        assert!(b.validate().is_err());
    }

    #[test]
    fn modified_at_is_a_valid_fallback() {
        let when = Utc::now() - Duration::days(3);
        let b = Backup {
            name: "fallback".into(),
            size: None,
            created_at: None,
            modified_at: Some(when),
        };
        assert!(b.validate().is_ok());
        assert_eq!(b.effective_created_at(), Some(when));
        assert_eq!(b.size_bytes(), 0);
    }
}
