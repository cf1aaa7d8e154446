//! Configuration for the dispatch engine and the sync-async bridge.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for event dispatchers and the pollers they drive.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Default read-ahead when the subscription does not override it.
    ///
    /// Read-ahead is the number of deliveries that may be in flight beyond
    /// the one currently awaiting its response, so the in-flight table is
    /// bounded at `read_ahead + 1`.
    pub default_read_ahead: usize,
    /// Maximum events fetched per poll cycle.
    pub batch_size: usize,
    /// Idle sleep between polls when no new events are available.
    pub poll_interval: Duration,
    /// Attempts to load the durable offset before the poller gives up
    /// starting.
    pub startup_offset_retry_attempts: u32,
    /// Backoff applied to failed polls and failed batch deliveries.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_read_ahead: 0,
            batch_size: 50,
            poll_interval: Duration::from_millis(100),
            startup_offset_retry_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration for the sync-async bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Upper bound on how long a `request_reply` caller blocks for a
    /// correlated reply before timing out.
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_default() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.default_read_ahead, 0);
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.startup_offset_retry_attempts, 5);
    }

    #[test]
    fn test_bridge_config_default() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.request_timeout, Duration::from_secs(120));
    }
}
