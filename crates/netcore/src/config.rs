//! Configuration loading and validation for the network client.
//!
//! All values are read from environment variables. Construction fails with a
//! clear error if a required variable is missing or a value is out of range.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Root URL every endpoint path is appended to. **Required.**
    pub base_url: String,

    /// Per-call deadline in milliseconds, covering connect through body read.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `host:port` polled for reachability. Connectivity is assumed online when unset.
    #[serde(default)]
    pub reachability_probe_addr: Option<String>,

    /// How often (seconds) to poll the reachability address.
    #[serde(default = "default_reachability_interval")]
    pub reachability_interval_secs: u64,

    /// How long (seconds) a cached query result counts as fresh.
    #[serde(default = "default_query_stale_time")]
    pub query_stale_time_secs: u64,

    /// How long (seconds) an unused cached query result is kept.
    #[serde(default = "default_query_gc_time")]
    pub query_gc_time_secs: u64,

    /// Extra attempts for a failing query.
    #[serde(default = "default_query_retry")]
    pub query_retry: u32,

    /// Extra attempts for a failing mutation.
    #[serde(default = "default_mutation_retry")]
    pub mutation_retry: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_reachability_interval() -> u64 {
    5
}
fn default_query_stale_time() -> u64 {
    300
}
fn default_query_gc_time() -> u64 {
    600
}
fn default_query_retry() -> u32 {
    2
}
fn default_mutation_retry() -> u32 {
    1
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_retry_max_delay() -> u64 {
    30_000
}

impl ClientConfig {
    /// Configuration with every optional value at its default.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            log_level: default_log_level(),
            reachability_probe_addr: None,
            reachability_interval_secs: default_reachability_interval(),
            query_stale_time_secs: default_query_stale_time(),
            query_gc_time_secs: default_query_gc_time(),
            query_retry: default_query_retry(),
            mutation_retry: default_mutation_retry(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }

    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: ClientConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("BASE_URL is required and must not be empty");
        }
        let url = reqwest::Url::parse(&self.base_url).context("BASE_URL is not a valid URL")?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("BASE_URL must use http or https, got {}", url.scheme());
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_MS must be > 0");
        }
        if self.reachability_interval_secs == 0 {
            anyhow::bail!("REACHABILITY_INTERVAL_SECS must be > 0");
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("RETRY_MAX_DELAY_MS must be >= RETRY_BASE_DELAY_MS");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reachability_interval(&self) -> Duration {
        Duration::from_secs(self.reachability_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_request_timeout_ms(), 10_000);
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_reachability_interval(), 5);
        assert_eq!(default_query_stale_time(), 300);
        assert_eq!(default_query_gc_time(), 600);
        assert_eq!(default_query_retry(), 2);
        assert_eq!(default_mutation_retry(), 1);
        assert_eq!(default_retry_base_delay(), 1000);
        assert_eq!(default_retry_max_delay(), 30_000);
    }

    #[test]
    fn validate_accepts_defaults() {
        let cfg = ClientConfig::with_base_url("https://api.example.com/");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_empty_base_url() {
        let cfg = ClientConfig::with_base_url("  ");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let cfg = ClientConfig::with_base_url("ftp://files.example.com/");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let cfg = ClientConfig {
            request_timeout_ms: 0,
            ..ClientConfig::with_base_url("https://api.example.com/")
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let cfg = ClientConfig {
            retry_base_delay_ms: 5000,
            retry_max_delay_ms: 100,
            ..ClientConfig::with_base_url("https://api.example.com/")
        };
        assert!(cfg.validate().is_err());
    }
}
