//! Queue engine configuration.

use std::time::Duration;

/// Tuning knobs shared by every queue a handler or sender owns.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of entries held in one in-memory page.
    pub page_size: usize,
    /// Processing/transmit attempts before an item is quarantined.
    pub max_retries: u32,
    /// Delay inserted before each outbound transmit (throttle). Zero disables.
    pub wait_period: Duration,
    /// SQLite synchronous mode: 0=OFF, 1=NORMAL, 2=FULL.
    pub synchronous: i32,
    /// SQLite cache size in pages (negative = KB).
    pub cache_size: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_retries: 3,
            wait_period: Duration::ZERO,
            synchronous: 1, // NORMAL - good balance of safety and speed
            cache_size: -2000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let page_size = std::env::var("RELAYQ_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.page_size);

        let max_retries = std::env::var("RELAYQ_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retries);

        let wait_period = std::env::var("RELAYQ_WAIT_PERIOD_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.wait_period);

        let synchronous = std::env::var("RELAYQ_SQLITE_SYNCHRONOUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.synchronous);

        let cache_size = std::env::var("RELAYQ_SQLITE_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_size);

        Self {
            page_size,
            max_retries,
            wait_period,
            synchronous,
            cache_size,
        }
    }
}
