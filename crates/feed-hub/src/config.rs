//! Feed hub configuration.

use common::FixedBackoff;
use std::time::Duration;
use tracing::warn;

use crate::supervisor::SupervisorPolicy;

/// Partial book depths the upstream accepts.
const SUPPORTED_DEPTHS: [u32; 3] = [5, 10, 20];

/// Tunables for the hub and its supervisors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Book levels per side requested from the feed.
    pub depth_levels: u32,
    /// Broadcast buffer per shared stream; slower observers skip ahead.
    pub channel_capacity: usize,
    /// Fixed wait between transport retries.
    pub retry_delay: Duration,
    /// Retries allowed before a feed enters `Error`.
    pub max_retries: u32,
    /// Longest allowed gap between messages.
    pub silence_threshold: Duration,
    /// How often the liveness probe runs.
    pub probe_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            depth_levels: 5,
            channel_capacity: 256,
            retry_delay: Duration::from_millis(2000),
            max_retries: 5,
            silence_threshold: Duration::from_millis(10_000),
            probe_interval: Duration::from_millis(2000),
        }
    }
}

impl FeedConfig {
    /// Defaults overridden by `FEED_*` environment variables.
    ///
    /// - `FEED_DEPTH` (5, 10 or 20)
    /// - `FEED_RETRY_DELAY_MS`
    /// - `FEED_MAX_RETRIES`
    /// - `FEED_SILENCE_MS`
    /// - `FEED_PROBE_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(var = name, value = %raw, "Ignoring invalid numeric setting");
                    None
                }
            }
        };

        let read_u32 = |name: &str| -> Option<u32> {
            let value = read(name)?;
            match u32::try_from(value) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(var = name, value, "Ignoring out of range setting");
                    None
                }
            }
        };

        let mut config = Self::default();
        if let Some(depth) = read_u32("FEED_DEPTH") {
            if SUPPORTED_DEPTHS.contains(&depth) {
                config.depth_levels = depth;
            } else {
                warn!(
                    var = "FEED_DEPTH",
                    value = depth,
                    supported = ?SUPPORTED_DEPTHS,
                    "Ignoring unsupported depth"
                );
            }
        }
        if let Some(ms) = read("FEED_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(retries) = read_u32("FEED_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(ms) = read("FEED_SILENCE_MS") {
            config.silence_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = read("FEED_PROBE_MS") {
            config.probe_interval = Duration::from_millis(ms.max(1));
        }
        config
    }

    pub fn supervisor_policy(&self) -> SupervisorPolicy {
        SupervisorPolicy {
            backoff: FixedBackoff::new(self.retry_delay, self.max_retries),
            silence_threshold: self.silence_threshold,
            probe_interval: self.probe_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.depth_levels, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.silence_threshold, Duration::from_secs(10));
        assert_eq!(config.probe_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FEED_DEPTH", "20"),
            ("FEED_MAX_RETRIES", "3"),
            ("FEED_SILENCE_MS", " 5000 "),
        ]
        .into_iter()
        .collect();

        let config = FeedConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.depth_levels, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.silence_threshold, Duration::from_secs(5));
        assert_eq!(config.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_lookup_ignores_garbage() {
        let config = FeedConfig::from_lookup(|name| {
            (name == "FEED_RETRY_DELAY_MS").then(|| "soon".to_string())
        });
        assert_eq!(config, FeedConfig::default());
    }

    #[test]
    fn test_lookup_rejects_unsupported_depth() {
        for raw in ["0", "7", "4294967301"] {
            let config =
                FeedConfig::from_lookup(|name| (name == "FEED_DEPTH").then(|| raw.to_string()));
            assert_eq!(config.depth_levels, 5, "FEED_DEPTH={}", raw);
        }

        let config = FeedConfig::from_lookup(|name| (name == "FEED_DEPTH").then(|| "10".to_string()));
        assert_eq!(config.depth_levels, 10);
    }

    #[test]
    fn test_lookup_rejects_out_of_range_retries() {
        // 2^32 + 3 would truncate to 3
        let config = FeedConfig::from_lookup(|name| {
            (name == "FEED_MAX_RETRIES").then(|| "4294967299".to_string())
        });
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_supervisor_policy_mirrors_config() {
        let config = FeedConfig {
            retry_delay: Duration::from_millis(500),
            max_retries: 2,
            ..FeedConfig::default()
        };
        let policy = config.supervisor_policy();
        assert_eq!(policy.backoff.delay(), Duration::from_millis(500));
        assert_eq!(policy.backoff.max_attempts(), 2);
        assert_eq!(policy.silence_threshold, config.silence_threshold);
    }
}
