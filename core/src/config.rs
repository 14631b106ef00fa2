use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use crate::error::ConfigError;
use crate::markup::Markup;

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// Tunables for the enrichment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnricherConfig {
    /// Minimum spacing between dispatch start times
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Maximum simultaneous in-flight resolutions
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Longest single sleep while a rate-limit pause is in effect
    #[serde(default = "default_rate_limit_recheck_cap_ms")]
    pub rate_limit_recheck_cap_ms: u64,

    /// Delay before a completed request re-arms the drain loop
    #[serde(default = "default_drain_retry_delay_ms")]
    pub drain_retry_delay_ms: u64,

    /// How long a bridge request waits for its response
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,

    /// Fallback rescan period
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Debounce window for durable cache writes
    #[serde(default = "default_cache_flush_debounce_ms")]
    pub cache_flush_debounce_ms: u64,

    /// Retention of a resolved location
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Sleep of an annotation waiting on another in-flight resolution
    #[serde(default = "default_waiter_retry_ms")]
    pub waiter_retry_ms: u64,

    /// Delay between re-enabling and the first rescan
    #[serde(default = "default_enable_settle_ms")]
    pub enable_settle_ms: u64,

    /// Fade-out delay before a tooltip is removed
    #[serde(default = "default_tooltip_fade_ms")]
    pub tooltip_fade_ms: u64,

    #[serde(default)]
    pub markup: Markup,
}

fn default_min_request_interval_ms() -> u64 {
    500
}

fn default_max_concurrent_requests() -> usize {
    5
}

fn default_rate_limit_recheck_cap_ms() -> u64 {
    60_000
}

fn default_drain_retry_delay_ms() -> u64 {
    200
}

fn default_bridge_timeout_ms() -> u64 {
    10_000
}

fn default_scan_interval_ms() -> u64 {
    2_000
}

fn default_cache_flush_debounce_ms() -> u64 {
    5_000
}

fn default_cache_ttl_ms() -> u64 {
    30 * DAY_MS
}

fn default_waiter_retry_ms() -> u64 {
    500
}

fn default_enable_settle_ms() -> u64 {
    500
}

fn default_tooltip_fade_ms() -> u64 {
    200
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: default_min_request_interval_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            rate_limit_recheck_cap_ms: default_rate_limit_recheck_cap_ms(),
            drain_retry_delay_ms: default_drain_retry_delay_ms(),
            bridge_timeout_ms: default_bridge_timeout_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            cache_flush_debounce_ms: default_cache_flush_debounce_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            waiter_retry_ms: default_waiter_retry_ms(),
            enable_settle_ms: default_enable_settle_ms(),
            tooltip_fade_ms: default_tooltip_fade_ms(),
            markup: Markup::default(),
        }
    }
}

impl EnricherConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be > 0".to_string(),
            ));
        }
        if self.rate_limit_recheck_cap_ms == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_recheck_cap_ms must be > 0".to_string(),
            ));
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid("scan_interval_ms must be > 0".to_string()));
        }
        if self.waiter_retry_ms == 0 {
            return Err(ConfigError::Invalid("waiter_retry_ms must be > 0".to_string()));
        }
        if self.cache_ttl_ms == 0 {
            return Err(ConfigError::Invalid("cache_ttl_ms must be > 0".to_string()));
        }
        if self.markup.post_containers.is_empty() && self.markup.profile_containers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one container selector is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn rate_limit_recheck_cap(&self) -> Duration {
        Duration::from_millis(self.rate_limit_recheck_cap_ms)
    }

    pub fn drain_retry_delay(&self) -> Duration {
        Duration::from_millis(self.drain_retry_delay_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn cache_flush_debounce(&self) -> Duration {
        Duration::from_millis(self.cache_flush_debounce_ms)
    }

    pub fn waiter_retry(&self) -> Duration {
        Duration::from_millis(self.waiter_retry_ms)
    }

    pub fn enable_settle(&self) -> Duration {
        Duration::from_millis(self.enable_settle_ms)
    }

    pub fn tooltip_fade(&self) -> Duration {
        Duration::from_millis(self.tooltip_fade_ms)
    }
}
