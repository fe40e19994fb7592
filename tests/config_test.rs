//! Tests for config loading from files and the environment

use serial_test::serial;
use siteaudit::config::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "SITEAUDIT_RATE_LIMIT",
    "SITEAUDIT_LOCK_TIMEOUT",
    "SITEAUDIT_EVENT_CHANNEL",
    "SITEAUDIT_EVENT_THROTTLE",
    "SITEAUDIT_VALIDATORS",
    "REDIS_URL",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
fn test_project_config_parses() {
    let config = Config::from_file(std::path::Path::new("config.toml"))
        .expect("config.toml should parse");
    config.validate().expect("config.toml should be valid");

    assert_eq!(config.events.channel, "siteaudit:events");
    assert_eq!(
        config.throttle_windows().get("stats-update"),
        Some(&Duration::from_secs(5))
    );
    assert_eq!(
        config.review.settings["title.too_long"]["max_length"],
        serde_json::json!(65)
    );
}

#[test]
fn test_from_file_round_trip() {
    let mut file = NamedTempFile::new().unwrap();
    let mut config = Config::default();
    config.lock.timeout_secs = 42;
    config.review.validators = vec!["title".to_string()];
    write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

    let loaded = Config::from_file(file.path()).unwrap();
    assert_eq!(loaded.lock.timeout_secs, 42);
    assert_eq!(loaded.review.validators, vec!["title"]);
}

#[test]
fn test_from_file_missing() {
    let result = Config::from_file(std::path::Path::new("/nonexistent/siteaudit.toml"));
    assert!(result.is_err());
}

#[test]
fn test_from_file_malformed() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[crawler]\nrate_limit = \"fast\"\n").unwrap();
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_validate_rejects_zero_values() {
    let mut config = Config::default();
    config.crawler.request_timeout_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.worker.zombie_threshold_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.events.channel.clear();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();
    let defaults = Config::default();

    assert_eq!(config.crawler.rate_limit, defaults.crawler.rate_limit);
    assert_eq!(config.lock.timeout_secs, defaults.lock.timeout_secs);
    assert_eq!(config.events.throttle, defaults.events.throttle);
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("SITEAUDIT_RATE_LIMIT", "9");
    std::env::set_var("SITEAUDIT_LOCK_TIMEOUT", "15");
    std::env::set_var("SITEAUDIT_EVENT_CHANNEL", "audit:test");
    std::env::set_var("SITEAUDIT_EVENT_THROTTLE", "worker-status=2, stats-update=10");
    std::env::set_var("SITEAUDIT_VALIDATORS", "title, meta");
    std::env::set_var("REDIS_URL", "redis://cache:6380");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.crawler.rate_limit, 9);
    assert_eq!(config.lock.timeout_secs, 15);
    assert_eq!(config.events.channel, "audit:test");
    assert_eq!(config.events.throttle.get("worker-status"), Some(&2));
    assert_eq!(config.events.throttle.get("stats-update"), Some(&10));
    assert_eq!(config.review.validators, vec!["title", "meta"]);
    assert_eq!(config.redis.url, "redis://cache:6380");
}

#[test]
#[serial]
fn test_from_env_rejects_bad_throttle() {
    clear_env();
    std::env::set_var("SITEAUDIT_EVENT_THROTTLE", "worker-status");
    let result = Config::from_env();
    clear_env();

    assert!(result.is_err());
}
