//! Federation replication configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the federation log engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Timeout for one "apply record" call against one endpoint
    pub rpc_timeout: Duration,

    /// Timeout for establishing a connection to a zone endpoint
    pub connect_timeout: Duration,

    /// Base delay before retrying a zone after a network failure
    pub retry_interval: Duration,

    /// Upper bound for the exponential retry backoff
    pub max_retry_interval: Duration,

    /// How often a caught-up worker re-checks for pending records
    pub idle_recheck_interval: Duration,

    /// Period of the housekeeping timer (log purge)
    pub timer_interval: Duration,

    /// Number of most recent log records guaranteed to survive a purge
    pub log_retention: u64,

    /// LMDB map size for the log store, in bytes
    pub map_size: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(500),
            max_retry_interval: Duration::from_secs(30),
            idle_recheck_interval: Duration::from_secs(10),
            timer_interval: Duration::from_secs(60),
            log_retention: 500_000,
            map_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

impl FederationConfig {
    /// Set the per-endpoint RPC timeout
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the connection establishment timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the network-failure retry base delay
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the housekeeping timer period
    pub fn with_timer_interval(mut self, interval: Duration) -> Self {
        self.timer_interval = interval;
        self
    }

    /// Set the purge retention count
    pub fn with_log_retention(mut self, retention: u64) -> Self {
        self.log_retention = retention;
        self
    }

    /// Set the LMDB map size
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_timeout.is_zero() {
            return Err("rpc_timeout must be non-zero".into());
        }

        if self.retry_interval.is_zero() {
            return Err("retry_interval must be non-zero".into());
        }

        if self.retry_interval > self.max_retry_interval {
            return Err("retry_interval must not exceed max_retry_interval".into());
        }

        if self.log_retention == 0 {
            return Err("log_retention must be at least 1".into());
        }

        if self.map_size == 0 {
            return Err("map_size must be non-zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FederationConfig::default();
        assert_eq!(config.log_retention, 500_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FederationConfig::default()
            .with_rpc_timeout(Duration::from_secs(2))
            .with_log_retention(100);
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.log_retention, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = FederationConfig::default().with_log_retention(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = FederationConfig::default();
        config.retry_interval = Duration::from_secs(60);
        config.max_retry_interval = Duration::from_secs(30);
        assert!(config.validate().is_err());
    }
}
