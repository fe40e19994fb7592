//! Configuration management for siteaudit workers
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Crawler configuration
    pub crawler: CrawlerConfig,

    /// Distributed lock configuration
    pub lock: LockConfig,

    /// Worker lifecycle configuration
    pub worker: WorkerConfig,

    /// Event bus configuration
    pub events: EventsConfig,

    /// Redis connection configuration
    pub redis: RedisConfig,

    /// Review pipeline configuration
    pub review: ReviewConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Crawler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,

    /// Links deeper than this many path segments are not crawl candidates
    pub max_path_depth: usize,
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease length in seconds
    pub timeout_secs: i64,

    /// Namespace prepended to every lock key
    pub key_prefix: String,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds without heartbeat before a worker counts as a zombie
    pub zombie_threshold_secs: i64,

    /// How often a worker refreshes its own heartbeat
    pub heartbeat_interval_secs: u64,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Shared pub/sub channel name
    pub channel: String,

    /// Minimum seconds between two dispatches of the same message type
    #[serde(default)]
    pub throttle: HashMap<String, u64>,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,
}

/// Review pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Facter names, in run order
    pub facters: Vec<String>,

    /// Validator names, in run order
    pub validators: Vec<String>,

    /// Per-violation overrides of the definition's default config
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let throttle = match std::env::var("SITEAUDIT_EVENT_THROTTLE") {
            Ok(raw) => parse_throttle(&raw).context("Invalid SITEAUDIT_EVENT_THROTTLE")?,
            Err(_) => defaults.events.throttle.clone(),
        };

        Ok(Self {
            crawler: CrawlerConfig {
                rate_limit: env_or("SITEAUDIT_RATE_LIMIT", defaults.crawler.rate_limit),
                request_timeout_secs: env_or(
                    "SITEAUDIT_REQUEST_TIMEOUT",
                    defaults.crawler.request_timeout_secs,
                ),
                user_agent: std::env::var("SITEAUDIT_USER_AGENT")
                    .unwrap_or(defaults.crawler.user_agent),
                max_path_depth: env_or("SITEAUDIT_MAX_PATH_DEPTH", defaults.crawler.max_path_depth),
            },
            lock: LockConfig {
                timeout_secs: env_or("SITEAUDIT_LOCK_TIMEOUT", defaults.lock.timeout_secs),
                key_prefix: std::env::var("SITEAUDIT_LOCK_PREFIX")
                    .unwrap_or(defaults.lock.key_prefix),
            },
            worker: WorkerConfig {
                zombie_threshold_secs: env_or(
                    "SITEAUDIT_ZOMBIE_THRESHOLD",
                    defaults.worker.zombie_threshold_secs,
                ),
                heartbeat_interval_secs: env_or(
                    "SITEAUDIT_HEARTBEAT_INTERVAL",
                    defaults.worker.heartbeat_interval_secs,
                ),
            },
            events: EventsConfig {
                channel: std::env::var("SITEAUDIT_EVENT_CHANNEL")
                    .unwrap_or(defaults.events.channel),
                throttle,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").unwrap_or(defaults.redis.url),
                pool_size: env_or("REDIS_POOL_SIZE", defaults.redis.pool_size),
            },
            review: ReviewConfig {
                facters: env_list("SITEAUDIT_FACTERS").unwrap_or(defaults.review.facters),
                validators: env_list("SITEAUDIT_VALIDATORS")
                    .unwrap_or(defaults.review.validators),
                settings: defaults.review.settings,
            },
            logging: LoggingConfig {
                level: std::env::var("SITEAUDIT_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("SITEAUDIT_LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.rate_limit == 0 {
            anyhow::bail!("rate_limit must be greater than 0");
        }

        if self.crawler.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.lock.timeout_secs <= 0 {
            anyhow::bail!("lock timeout_secs must be positive");
        }

        if self.worker.zombie_threshold_secs <= 0 {
            anyhow::bail!("zombie_threshold_secs must be positive");
        }

        if self.events.channel.is_empty() {
            anyhow::bail!("events channel must not be empty");
        }

        if self.redis.pool_size == 0 {
            anyhow::bail!("redis pool_size must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    /// Throttle windows keyed by message type
    #[must_use]
    pub fn throttle_windows(&self) -> HashMap<String, Duration> {
        self.events
            .throttle
            .iter()
            .map(|(kind, secs)| (kind.clone(), Duration::from_secs(*secs)))
            .collect()
    }
}

/// Parse `type=secs,type=secs` into a throttle table
fn parse_throttle(raw: &str) -> Result<HashMap<String, u64>> {
    let mut table = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (kind, secs) = pair
            .split_once('=')
            .with_context(|| format!("Expected type=seconds, got '{pair}'"))?;
        let secs = secs
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Invalid throttle seconds in '{pair}'"))?;
        table.insert(kind.trim().to_string(), secs);
    }
    Ok(table)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                rate_limit: 5,
                request_timeout_secs: 20,
                user_agent: format!("siteaudit/{}", env!("CARGO_PKG_VERSION")),
                max_path_depth: 8,
            },
            lock: LockConfig {
                timeout_secs: 300,
                key_prefix: String::from("siteaudit:lock"),
            },
            worker: WorkerConfig {
                zombie_threshold_secs: 120,
                heartbeat_interval_secs: 30,
            },
            events: EventsConfig {
                channel: String::from("siteaudit:events"),
                throttle: HashMap::from([(String::from("stats-update"), 5)]),
            },
            redis: RedisConfig {
                url: String::from("redis://localhost:6379"),
                pool_size: 10,
            },
            review: ReviewConfig {
                facters: vec!["html".into(), "requests".into(), "links".into()],
                validators: vec![
                    "title".into(),
                    "meta".into(),
                    "requests".into(),
                    "links".into(),
                    "www_redirect".into(),
                ],
                settings: HashMap::new(),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_lock_timeout() {
        let mut config = Config::default();
        config.lock.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_parse_throttle() {
        let table = parse_throttle("worker-status=2, stats-update=10").unwrap();
        assert_eq!(table.get("worker-status"), Some(&2));
        assert_eq!(table.get("stats-update"), Some(&10));

        assert!(parse_throttle("worker-status").is_err());
        assert!(parse_throttle("worker-status=soon").is_err());
    }

    #[test]
    fn test_throttle_windows() {
        let config = Config::default();
        let windows = config.throttle_windows();
        assert_eq!(windows.get("stats-update"), Some(&Duration::from_secs(5)));
    }
}
