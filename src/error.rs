use thiserror::Error;

/// Errors surfaced by the retention core.
///
/// Construction-time problems (bad policy configuration) fail fast.
/// Run-time problems during evaluation or cleanup are captured into the
/// result/report structures instead and never cross the call boundary
/// as errors.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid policy configuration: {0}")]
    InvalidPolicy(String),

    #[error("invalid backup entry: {0}")]
    InvalidBackup(String),

    #[error("background task queue is shut down")]
    QueueClosed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error-message fragments that indicate a retryable deletion failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "busy",
    "locked",
    "lock",
    "too many",
    "permission",
    "denied",
    "timeout",
    "timed out",
    "network",
    "connection",
    "temporarily",
    "unavailable",
];

/// Whether an external-call failure looks transient (worth retrying).
///
/// The match is a case-insensitive substring check against the error text,
/// since collaborator errors arrive as opaque messages.
pub fn is_transient_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}
