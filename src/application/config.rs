use std::time::Duration;

use crate::storage::PoolSettings;

/// Tunables for the ledger service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts at a transfer's atomic unit before reporting a conflict
    pub max_retries: u32,
    /// Base backoff between attempts; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Write a FAILURE audit entry for rejected transfer attempts
    pub audit_failures: bool,
    pub pool: PoolSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(20),
            audit_failures: false,
            pool: PoolSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_failure_auditing(mut self, enabled: bool) -> Self {
        self.audit_failures = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert!(!config.audit_failures);
        assert_eq!(config.pool.max_connections, 10);
    }

    #[test]
    fn test_backoff_is_linear() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(20));
        assert_eq!(config.backoff_for(3), Duration::from_millis(60));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(EngineConfig::default().with_max_retries(0).max_retries, 1);
    }
}
