//! Key-value transport behind the distributed lock
//!
//! Four primitives are enough for the lease algorithm: set-if-absent, get,
//! get-and-set, and delete. [`RedisKv`] maps them onto `SETNX`, `GET`,
//! `GETSET` and `DEL`; [`MemoryKv`] keeps them in process for
//! single-process runs and tests.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::utils::error::LockError;

/// Atomic primitives over integer-valued keys
#[async_trait]
pub trait KeyValueTransport: Send + Sync {
    /// Store `value` only if `key` does not exist; true when stored
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, LockError>;

    /// Current value of `key`
    async fn get(&self, key: &str) -> Result<Option<i64>, LockError>;

    /// Replace the value of `key` and return the previous one
    async fn get_set(&self, key: &str, value: i64) -> Result<Option<i64>, LockError>;

    /// Remove `key`; returns the number of keys deleted
    async fn delete(&self, key: &str) -> Result<u64, LockError>;
}

// ============================================================================
// In-memory transport
// ============================================================================

/// Process-local transport
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueTransport for MemoryKv {
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, LockError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError> {
        Ok(self.entries.lock().await.get(key).copied())
    }

    async fn get_set(&self, key: &str, value: i64) -> Result<Option<i64>, LockError> {
        Ok(self.entries.lock().await.insert(key.to_string(), value))
    }

    async fn delete(&self, key: &str) -> Result<u64, LockError> {
        Ok(u64::from(self.entries.lock().await.remove(key).is_some()))
    }
}

// ============================================================================
// Redis transport
// ============================================================================

/// Redis-backed transport sharing a connection pool
#[derive(Clone)]
pub struct RedisKv {
    pool: Pool,
}

/// Parse a stored lease; anything unreadable counts as long expired
fn parse_lease(key: &str, raw: Option<String>) -> Option<i64> {
    raw.map(|raw| {
        raw.trim().parse::<i64>().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Unparseable lease value, treating as expired");
            0
        })
    })
}

impl RedisKv {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueTransport for RedisKv {
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, LockError> {
        let mut conn = self.pool.get().await?;
        let stored: bool = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        Ok(parse_lease(key, raw))
    }

    async fn get_set(&self, key: &str, value: i64) -> Result<Option<i64>, LockError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = redis::cmd("GETSET")
            .arg(key)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(parse_lease(key, raw))
    }

    async fn delete(&self, key: &str) -> Result<u64, LockError> {
        let mut conn = self.pool.get().await?;
        let deleted: u64 = conn.del(key).await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease() {
        assert_eq!(parse_lease("k", None), None);
        assert_eq!(parse_lease("k", Some("1700000000".into())), Some(1_700_000_000));
        assert_eq!(parse_lease("k", Some("garbage".into())), Some(0));
    }

    #[tokio::test]
    async fn test_memory_kv_primitives() {
        let kv = MemoryKv::new();
        assert!(kv.set_if_absent("a", 10).await.unwrap());
        assert!(!kv.set_if_absent("a", 20).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap(), Some(10));
        assert_eq!(kv.get_set("a", 30).await.unwrap(), Some(10));
        assert_eq!(kv.get("a").await.unwrap(), Some(30));
        assert_eq!(kv.delete("a").await.unwrap(), 1);
        assert_eq!(kv.delete("a").await.unwrap(), 0);
        assert!(kv.is_empty().await);
    }
}
