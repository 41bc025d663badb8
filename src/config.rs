use std::time::Duration;

/// Tuning knobs for the retention core.
///
/// Constructed once per process and handed to [`crate::engine::RetentionEngine`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum number of entries kept in the size cache.
    pub cache_capacity: usize,
    /// Time-to-live for size cache entries.
    pub cache_ttl: Duration,
    /// Maximum number of background tasks running at once.
    pub queue_concurrency: usize,
    /// Number of size-oracle lookups grouped into one queued task.
    pub oracle_batch_size: usize,
    /// Number of deletions performed per batch during cleanup.
    pub deletion_batch_size: usize,
    /// Pause between deletion batches.
    pub batch_pause: Duration,
    /// Additional retry attempts for transient deletion failures.
    pub max_delete_retries: u32,
    /// Base delay before a deletion retry; grows linearly per attempt.
    pub retry_base_delay: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(5 * 60),
            queue_concurrency: 3,
            oracle_batch_size: 5,
            deletion_batch_size: 5,
            batch_pause: Duration::from_millis(200),
            max_delete_retries: 2,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

impl CoreConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            cache_capacity: env_parse("RETENTION_CACHE_CAPACITY", defaults.cache_capacity),
            cache_ttl: Duration::from_secs(env_parse(
                "RETENTION_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            queue_concurrency: env_parse("RETENTION_QUEUE_CONCURRENCY", defaults.queue_concurrency),
            oracle_batch_size: env_parse("RETENTION_ORACLE_BATCH_SIZE", defaults.oracle_batch_size),
            deletion_batch_size: env_parse(
                "RETENTION_DELETE_BATCH_SIZE",
                defaults.deletion_batch_size,
            ),
            batch_pause: Duration::from_millis(env_parse(
                "RETENTION_BATCH_PAUSE_MS",
                defaults.batch_pause.as_millis() as u64,
            )),
            max_delete_retries: env_parse("RETENTION_DELETE_RETRIES", defaults.max_delete_retries),
            retry_base_delay: Duration::from_millis(env_parse(
                "RETENTION_RETRY_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.cache_capacity, 1000);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.queue_concurrency, 3);
        assert_eq!(cfg.oracle_batch_size, 5);
        assert_eq!(cfg.deletion_batch_size, 5);
        assert_eq!(cfg.max_delete_retries, 2);
    }
}
