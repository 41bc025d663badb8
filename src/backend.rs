//! External collaborator interfaces.
//!
//! The retention core never touches storage directly. Listing, measuring
//! and deleting backups (and persisting operator settings) are narrow
//! interfaces implemented by the embedding server and injected as
//! `Arc<dyn _>` instances.

use futures_util::future::BoxFuture;

use crate::models::backup::Backup;
use crate::models::settings::RetentionSettings;

/// Storage-side operations on backup artifacts.
///
/// Implementations may be slow or flaky; the core batches and retries
/// around them but never assumes success.
pub trait BackupBackend: Send + Sync {
    /// List the backup artifacts currently present under `path`.
    fn list_backups(&self, path: &str) -> BoxFuture<'_, anyhow::Result<Vec<Backup>>>;

    /// Measure the authoritative on-disk size of one artifact.
    fn measure_backup_size(&self, path: &str, name: &str) -> BoxFuture<'_, anyhow::Result<u64>>;

    /// Delete one artifact. Failures are classified by message text; see
    /// [`crate::error::is_transient_error`].
    fn delete_backup(&self, path: &str, name: &str) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Persistence for the operator's retention settings.
pub trait SettingsStore: Send + Sync {
    fn get_retention_settings(&self) -> BoxFuture<'_, anyhow::Result<RetentionSettings>>;

    fn save_retention_settings(
        &self,
        settings: RetentionSettings,
    ) -> BoxFuture<'_, anyhow::Result<()>>;
}
