//! Integration tests for the lease-based distributed lock

use async_trait::async_trait;
use futures::future::join_all;
use siteaudit::coordinator::{DistributedLock, KeyValueTransport, MemoryKv};
use siteaudit::utils::error::LockError;
use std::sync::Arc;
use tokio_test::assert_ok;

const RESOURCE: &str = "http://example.com/";

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let kv = Arc::new(MemoryKv::new());
    let locks: Vec<_> = (0..16).map(|_| DistributedLock::new(kv.clone(), 60)).collect();

    let results = join_all(locks.iter().map(|lock| lock.acquire_at(RESOURCE, 1_000))).await;
    let winners = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|acquired| *acquired)
        .count();

    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_concurrent_takeover_has_one_winner() {
    let kv = Arc::new(MemoryKv::new());
    let holder = DistributedLock::new(kv.clone(), 60);
    assert!(holder.acquire_at(RESOURCE, 1_000).await.unwrap());

    // The lease (1061) has expired for everyone arriving at 1100.
    let contenders: Vec<_> = (0..8).map(|_| DistributedLock::new(kv.clone(), 60)).collect();
    let results = join_all(contenders.iter().map(|lock| lock.acquire_at(RESOURCE, 1_100))).await;
    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(winners, 1);
    assert_eq!(kv.get(&holder.key_for(RESOURCE)).await.unwrap(), Some(1_161));
}

#[tokio::test]
async fn test_lease_lifecycle() {
    let kv = Arc::new(MemoryKv::new());
    let a = DistributedLock::new(kv.clone(), 60);
    let b = DistributedLock::new(kv.clone(), 60);

    assert!(a.acquire_at(RESOURCE, 1_000).await.unwrap());
    assert!(!b.acquire_at(RESOURCE, 1_030).await.unwrap());
    assert!(!b.acquire_at(RESOURCE, 1_061).await.unwrap());
    assert!(b.acquire_at(RESOURCE, 1_062).await.unwrap());

    // Released by b; a released its stale claim too late to matter.
    assert_eq!(b.release(RESOURCE).await.unwrap(), 1);
    assert_eq!(a.release(RESOURCE).await.unwrap(), 0);
    assert!(kv.is_empty().await);
}

#[tokio::test]
async fn test_locks_are_per_resource() {
    let kv = Arc::new(MemoryKv::new());
    let lock = DistributedLock::new(kv.clone(), 60);

    assert!(lock.acquire_at("http://a.example/", 1_000).await.unwrap());
    assert!(lock.acquire_at("http://b.example/", 1_000).await.unwrap());
    assert!(!lock.acquire_at("http://a.example/", 1_000).await.unwrap());
    assert_eq!(kv.len().await, 2);
}

#[tokio::test]
async fn test_prefixes_isolate_namespaces() {
    let kv = Arc::new(MemoryKv::new());
    let audit = DistributedLock::new(kv.clone(), 60).with_prefix("audit");
    let crawl = DistributedLock::new(kv.clone(), 60).with_prefix("crawl");

    assert!(audit.acquire_at(RESOURCE, 1_000).await.unwrap());
    assert!(crawl.acquire_at(RESOURCE, 1_000).await.unwrap());
}

/// Transport where a rival overwrites the lease between our GET and GETSET
struct RacingKv {
    inner: MemoryKv,
    rival_value: i64,
}

#[async_trait]
impl KeyValueTransport for RacingKv {
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, LockError> {
        self.inner.set_if_absent(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError> {
        let current = self.inner.get(key).await?;
        self.inner.get_set(key, self.rival_value).await?;
        Ok(current)
    }

    async fn get_set(&self, key: &str, value: i64) -> Result<Option<i64>, LockError> {
        self.inner.get_set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<u64, LockError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_lost_takeover_race_is_not_acquired() {
    let kv = Arc::new(RacingKv {
        inner: MemoryKv::new(),
        rival_value: 1_170,
    });
    let lock = DistributedLock::new(kv.clone(), 60);
    assert_ok!(kv.set_if_absent(&lock.key_for(RESOURCE), 1_061).await);

    assert!(!lock.acquire_at(RESOURCE, 1_100).await.unwrap());
}

#[tokio::test]
async fn test_release_of_unheld_lock_is_zero() {
    let lock = DistributedLock::new(Arc::new(MemoryKv::new()), 60);
    assert_eq!(lock.release(RESOURCE).await.unwrap(), 0);
}
