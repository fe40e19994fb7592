//! Cross-process coordination for siteaudit workers
//!
//! Workers never talk to each other directly. They share two Redis
//! facilities: keys used as lease-based locks, and one pub/sub channel for
//! status events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── worker process ────────────────────────────┐
//! │                                                                        │
//! │  WorkerRunner ──▶ WorkerMachine ──START/COMPLETE──▶ DistributedLock    │
//! │       │                 │                                │             │
//! │       │                 └── worker-status ──▶ EventBus   │             │
//! │       ▼                                          │       │             │
//! │  ReviewPipeline                                  │ flush │ SETNX/GET/  │
//! │                                                  │       │ GETSET/DEL  │
//! └──────────────────────────────────────────────────┼───────┼─────────────┘
//!                                                    ▼       ▼
//!                                          Redis PUBLISH   Redis keys
//! ```
//!
//! - [`kv`] - key-value primitives (Redis and in-memory)
//! - [`lock`] - lease-with-fencing mutex
//! - [`worker`] - IDLE/WORKING state machine
//! - [`roster`] - heartbeat view of the fleet
//! - [`events`] - throttled pub/sub bus
//! - [`runner`] - per-URL job loop

pub mod events;
pub mod kv;
pub mod lock;
pub mod roster;
pub mod runner;
pub mod worker;

use anyhow::{Context, Result};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};

use crate::config::RedisConfig;

pub use events::{BusMessage, DispatchOutcome, EventBus, EventTransport, Frame, MemoryEventTransport, RedisEventTransport};
pub use kv::{KeyValueTransport, MemoryKv, RedisKv};
pub use lock::DistributedLock;
pub use roster::{WorkerInfo, WorkerRoster};
pub use runner::{JobOutcome, RunSummary, WorkerRunner};
pub use worker::{StartOutcome, Worker, WorkerMachine, WorkerState, WORKER_STATUS_EVENT};

/// Build a Redis connection pool and check it with `PING`
pub async fn connect_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = PoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create Redis connection pool")?;

    let mut conn = pool.get().await.context("Failed to get Redis connection")?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .context("Failed to ping Redis")?;

    tracing::info!(url = %config.url, "Connected to Redis");
    Ok(pool)
}
