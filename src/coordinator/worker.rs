//! Worker lifecycle: IDLE ↔ WORKING, gated by the distributed lock
//!
//! ```text
//!          start(url) + lock acquired
//!   IDLE ─────────────────────────────▶ WORKING(url)
//!    ▲                                      │
//!    └──────── complete(): release ─────────┘
//! ```
//!
//! Every transition announces itself with a `worker-status` event. Calls
//! that make no sense in the current state are logged and ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use super::events::{BusMessage, EventBus};
use super::lock::DistributedLock;
use crate::utils::error::LockError;

/// Event type announcing a worker transition
pub const WORKER_STATUS_EVENT: &str = "worker-status";

/// Observable worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Working,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
        }
    }
}

/// Worker record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub heartbeat: DateTime<Utc>,
    pub current_url: Option<String>,
}

impl Worker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heartbeat: Utc::now(),
            current_url: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        match self.current_url {
            Some(_) => WorkerState::Working,
            None => WorkerState::Idle,
        }
    }

    /// Check if heartbeat is stale as of `now`
    pub fn is_zombie(&self, threshold_secs: i64, now: DateTime<Utc>) -> bool {
        (now - self.heartbeat).num_seconds() > threshold_secs
    }

    /// `worker-status` event describing this worker as it is now
    pub fn status_message(&self) -> BusMessage {
        BusMessage::new(WORKER_STATUS_EVENT)
            .with("worker", self.id.clone())
            .with("state", self.state().as_str())
            .with("url", self.current_url.clone())
            .with("heartbeat", self.heartbeat.to_rfc3339())
    }
}

/// Result of a START request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Lock acquired; the worker is now WORKING
    Started,
    /// Another worker holds the lock; pick another job
    Contended,
    /// The worker was already WORKING; nothing changed
    AlreadyWorking,
}

/// Drives one [`Worker`] through its lifecycle
pub struct WorkerMachine {
    worker: Worker,
    lock: DistributedLock,
    bus: Arc<EventBus>,
    snapshot: watch::Sender<Worker>,
}

impl WorkerMachine {
    pub fn new(id: impl Into<String>, lock: DistributedLock, bus: Arc<EventBus>) -> Self {
        let worker = Worker::new(id);
        let (snapshot, _) = watch::channel(worker.clone());
        Self {
            worker,
            lock,
            bus,
            snapshot,
        }
    }

    /// Follow this worker's record as it changes
    pub fn watch(&self) -> watch::Receiver<Worker> {
        self.snapshot.subscribe()
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.worker.current_url.as_deref()
    }

    /// Claim `url` and move to WORKING
    ///
    /// # Errors
    ///
    /// Returns `LockError` only when the lock transport fails; contention is
    /// reported as [`StartOutcome::Contended`].
    pub async fn start(&mut self, url: &str) -> Result<StartOutcome, LockError> {
        if let Some(current) = &self.worker.current_url {
            tracing::warn!(
                worker = %self.worker.id,
                current = %current,
                requested = %url,
                "START while working, ignoring"
            );
            return Ok(StartOutcome::AlreadyWorking);
        }

        if !self.lock.acquire(url).await? {
            tracing::debug!(worker = %self.worker.id, url = %url, "URL locked by another worker");
            return Ok(StartOutcome::Contended);
        }

        self.worker.current_url = Some(url.to_string());
        self.worker.heartbeat = Utc::now();
        self.announce();
        tracing::info!(worker = %self.worker.id, url = %url, "Worker started");
        Ok(StartOutcome::Started)
    }

    /// Release the current URL and move to IDLE
    ///
    /// Returns false when the worker was already idle.
    ///
    /// # Errors
    ///
    /// Returns the `LockError` of a failed release. The worker is IDLE
    /// either way; an unreleased lease expires after the lock timeout.
    pub async fn complete(&mut self) -> Result<bool, LockError> {
        let Some(url) = self.worker.current_url.take() else {
            tracing::warn!(worker = %self.worker.id, "COMPLETE while idle, ignoring");
            return Ok(false);
        };

        let released = self.lock.release(&url).await;

        self.worker.heartbeat = Utc::now();
        self.announce();

        match released {
            Ok(0) => {
                tracing::warn!(worker = %self.worker.id, url = %url, "Lock was already gone on release");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(worker = %self.worker.id, url = %url, error = %e, "Lock release failed, lease left to expire");
                return Err(e);
            }
        }

        tracing::info!(worker = %self.worker.id, url = %url, "Worker completed");
        Ok(true)
    }

    /// Refresh the heartbeat and return it
    pub fn heartbeat(&mut self) -> DateTime<Utc> {
        self.worker.heartbeat = Utc::now();
        self.snapshot.send_replace(self.worker.clone());
        self.worker.heartbeat
    }

    fn announce(&self) {
        self.snapshot.send_replace(self.worker.clone());
        self.bus.publish(self.worker.status_message());
    }
}
