//! Backup Retention Core
//!
//! Retention policy evaluation/execution and incremental storage tracking
//! for externally produced backup artifacts. The crate owns no storage
//! itself: listing, measuring and deleting backups are delegated to a
//! [`backend::BackupBackend`] supplied by the embedder.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use backend::{BackupBackend, SettingsStore};
pub use config::CoreConfig;
pub use engine::RetentionEngine;
pub use error::CoreError;
pub use models::backup::Backup;
pub use models::policy::{PolicyLimits, RetentionPolicy};
pub use models::report::{DeletionReason, EvaluationResult, ExecutionReport};
pub use models::settings::RetentionSettings;
pub use services::executor::{CleanupEvent, CleanupOptions, ConfirmFn, PolicyExecutor};
pub use services::size_tracker::SizeComputation;
pub use services::warnings::{RetentionPreview, RetentionWarning, Severity};
