//! Lease-based distributed mutex
//!
//! The key holds the UNIX second at which the lease expires. A crashed
//! holder never releases, so a contender that finds an expired lease may
//! take it over with `GETSET`; reading back the overwritten value tells it
//! whether another contender got there first.
//!
//! ```text
//! SETNX key (now + timeout + 1) ──ok──▶ acquired
//!      │ taken
//!      ▼
//! GET key ──missing──▶ not acquired (holder released in between)
//!      │ cur
//!      ├── now <= cur ──▶ not acquired (live holder)
//!      ▼
//! GETSET key (now + timeout + 1) ── old == cur ──▶ acquired
//!                                └─ otherwise ───▶ not acquired
//! ```
//!
//! One attempt per call: contention returns `Ok(false)` immediately and the
//! caller moves on to another job.

use chrono::Utc;
use std::sync::Arc;

use super::kv::KeyValueTransport;
use crate::config::LockConfig;
use crate::metrics;
use crate::utils::error::LockError;

/// Default namespace for lock keys
pub const DEFAULT_KEY_PREFIX: &str = "siteaudit:lock";

/// Distributed mutex over a shared key-value transport
#[derive(Clone)]
pub struct DistributedLock {
    transport: Arc<dyn KeyValueTransport>,
    timeout_secs: i64,
    key_prefix: String,
}

impl DistributedLock {
    pub fn new(transport: Arc<dyn KeyValueTransport>, timeout_secs: i64) -> Self {
        Self {
            transport,
            timeout_secs,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn from_config(transport: Arc<dyn KeyValueTransport>, config: &LockConfig) -> Self {
        Self::new(transport, config.timeout_secs).with_prefix(&config.key_prefix)
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Lease length in seconds
    pub fn timeout_secs(&self) -> i64 {
        self.timeout_secs
    }

    /// Storage key for a resource
    pub fn key_for(&self, resource: &str) -> String {
        format!("{}:{}", self.key_prefix, resource)
    }

    /// Try once to acquire the lock on `resource`
    pub async fn acquire(&self, resource: &str) -> Result<bool, LockError> {
        self.acquire_at(resource, Utc::now().timestamp()).await
    }

    /// Try once to acquire the lock as of `now` (UNIX seconds)
    pub async fn acquire_at(&self, resource: &str, now: i64) -> Result<bool, LockError> {
        let key = self.key_for(resource);
        let expires = now + self.timeout_secs + 1;

        let acquired = if self.transport.set_if_absent(&key, expires).await? {
            true
        } else {
            match self.transport.get(&key).await? {
                None => false,
                Some(current) if now > current => {
                    let previous = self.transport.get_set(&key, expires).await?;
                    if previous == Some(current) {
                        tracing::info!(key = %key, expired_at = current, "Took over expired lease");
                        true
                    } else {
                        false
                    }
                }
                Some(_) => false,
            }
        };

        tracing::debug!(key = %key, acquired, "Lock attempt");
        metrics::record_lock_attempt(acquired);
        Ok(acquired)
    }

    /// Release the lock on `resource`
    ///
    /// Deletes unconditionally; returns how many keys were removed. Zero is
    /// not an error.
    pub async fn release(&self, resource: &str) -> Result<u64, LockError> {
        let key = self.key_for(resource);
        let deleted = self.transport.delete(&key).await?;
        tracing::debug!(key = %key, deleted, "Lock released");
        metrics::record_lock_release(deleted);
        Ok(deleted)
    }
}
