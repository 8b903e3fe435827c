//! Configuration types for the traffic classifier.

use crate::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("backoff.multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("backoff.max_delay_ms ({max}) is below backoff.initial_delay_ms ({initial})")]
    MaxBelowInitial { initial: u64, max: u64 },

    #[error("cache.max_entries must be greater than zero")]
    ZeroCapacity,

    #[error("headers.{0} must not be empty")]
    EmptyHeaderName(&'static str),
}

/// Main configuration for the traffic classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Rapid-revisit detection
    pub fast_browser: FastBrowserConfig,

    /// Cross-IP correlation detection
    pub ip_rotation: IpRotationConfig,

    /// Penalty growth for rapid revisits
    pub backoff: BackoffConfig,

    /// State store bounds
    pub cache: CacheConfig,

    /// Header names attached by the proxy
    pub headers: HeaderConfig,
}

impl ClassifierConfig {
    /// Check every section for values the detectors cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fast_browser.visit_window_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "fast_browser.visit_window_ms",
            });
        }
        if self.fast_browser.penalty_box_ttl_seconds == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "fast_browser.penalty_box_ttl_seconds",
            });
        }
        if self.ip_rotation.window_seconds == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "ip_rotation.window_seconds",
            });
        }
        self.backoff.validate()?;
        if self.cache.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.headers.labels_header.trim().is_empty() {
            return Err(ConfigError::EmptyHeaderName("labels_header"));
        }
        if self.headers.trace_id_header.trim().is_empty() {
            return Err(ConfigError::EmptyHeaderName("trace_id_header"));
        }
        Ok(())
    }
}

/// Rapid-revisit detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastBrowserConfig {
    /// Enable the detector
    pub enabled: bool,

    /// Window in which a repeat visit counts as rapid, in milliseconds
    pub visit_window_ms: u64,

    /// Lifetime of a penalty box record, in seconds
    pub penalty_box_ttl_seconds: u64,
}

impl FastBrowserConfig {
    pub fn visit_window(&self) -> Duration {
        Duration::from_millis(self.visit_window_ms)
    }

    pub fn penalty_box_ttl(&self) -> Duration {
        Duration::from_secs(self.penalty_box_ttl_seconds)
    }
}

impl Default for FastBrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            visit_window_ms: 900,
            penalty_box_ttl_seconds: 20 * 60,
        }
    }
}

/// Cross-IP correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpRotationConfig {
    /// Enable the detector
    pub enabled: bool,

    /// Correlation window, refreshed on every sighting, in seconds
    pub window_seconds: u64,
}

impl IpRotationConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for IpRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 10,
        }
    }
}

/// Exponential penalty settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Cool-down after the first penalty, in milliseconds
    pub initial_delay_ms: u64,

    /// Growth factor per repeated contact while penalized
    pub multiplier: f64,

    /// Upper bound of a single cool-down, in milliseconds
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "backoff.initial_delay_ms",
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::MaxBelowInitial {
                initial: self.initial_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries per detector store
    pub max_entries: usize,

    /// Operations between opportunistic sweeps of expired entries
    pub sweep_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            sweep_interval: crate::cache::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Names of the headers attached to flagged requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Comma-joined label names
    pub labels_header: String,

    /// Trace id correlating the flagged request with logs
    pub trace_id_header: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            labels_header: "X-Bot-Labels".to_string(),
            trace_id_header: "X-Bot-Trace-Id".to_string(),
        }
    }
}
