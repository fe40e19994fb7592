//! Fleet roster built from worker heartbeats
//!
//! Each process keeps its own view of the fleet, fed by `worker-status`
//! events and by its local workers. A worker whose last heartbeat is older
//! than the zombie threshold is no longer counted as active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::events::BusMessage;
use super::worker::WORKER_STATUS_EVENT;
use crate::metrics;

/// Last known state of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub current_url: Option<String>,
}

impl WorkerInfo {
    /// Check if heartbeat is stale as of `now`
    pub fn is_zombie(&self, threshold_secs: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > threshold_secs
    }
}

/// Heartbeat-based view of the worker fleet
#[derive(Clone)]
pub struct WorkerRoster {
    workers: Arc<RwLock<HashMap<String, WorkerInfo>>>,
    zombie_threshold_secs: i64,
}

impl WorkerRoster {
    pub fn new(zombie_threshold_secs: i64) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            zombie_threshold_secs,
        }
    }

    /// Record a heartbeat now
    pub async fn heartbeat(&self, id: &str, current_url: Option<String>) {
        self.heartbeat_at(id, current_url, Utc::now()).await;
    }

    /// Record a heartbeat taken at `at`
    ///
    /// Out-of-order heartbeats never move a worker's clock backwards.
    pub async fn heartbeat_at(&self, id: &str, current_url: Option<String>, at: DateTime<Utc>) {
        let mut workers = self.workers.write().await;
        let info = workers.entry(id.to_string()).or_insert_with(|| WorkerInfo {
            id: id.to_string(),
            last_heartbeat: at,
            current_url: None,
        });
        if at >= info.last_heartbeat {
            info.last_heartbeat = at;
            info.current_url = current_url;
        }
    }

    /// Refresh a worker's heartbeat without touching its URL
    pub async fn touch_at(&self, id: &str, at: DateTime<Utc>) {
        let mut workers = self.workers.write().await;
        let info = workers.entry(id.to_string()).or_insert_with(|| WorkerInfo {
            id: id.to_string(),
            last_heartbeat: at,
            current_url: None,
        });
        if at > info.last_heartbeat {
            info.last_heartbeat = at;
        }
    }

    /// Fold a `worker-status` event into the roster
    ///
    /// Events without a `url` field are plain heartbeats.
    pub async fn observe(&self, message: &BusMessage) {
        if message.kind != WORKER_STATUS_EVENT {
            return;
        }
        let Some(id) = message.str_field("worker") else {
            tracing::warn!("worker-status event without worker id");
            return;
        };
        let at = message
            .str_field("heartbeat")
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));
        match message.field("url") {
            Some(url) => {
                let url = url.as_str().map(String::from);
                self.heartbeat_at(id, url, at).await;
            }
            None => self.touch_at(id, at).await,
        }
    }

    /// Workers with a fresh heartbeat, sorted by id
    pub async fn active_workers(&self) -> Vec<WorkerInfo> {
        self.active_at(Utc::now()).await
    }

    pub async fn active_at(&self, now: DateTime<Utc>) -> Vec<WorkerInfo> {
        self.partition(now).await.0
    }

    /// Workers whose heartbeat exceeded the threshold, sorted by id
    pub async fn zombies(&self) -> Vec<WorkerInfo> {
        self.zombies_at(Utc::now()).await
    }

    pub async fn zombies_at(&self, now: DateTime<Utc>) -> Vec<WorkerInfo> {
        self.partition(now).await.1
    }

    /// Drop a worker from the roster
    pub async fn forget(&self, id: &str) -> Option<WorkerInfo> {
        self.workers.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn partition(&self, now: DateTime<Utc>) -> (Vec<WorkerInfo>, Vec<WorkerInfo>) {
        let workers = self.workers.read().await;
        let (mut zombies, mut active): (Vec<_>, Vec<_>) = workers
            .values()
            .cloned()
            .partition(|w| w.is_zombie(self.zombie_threshold_secs, now));
        active.sort_by(|a, b| a.id.cmp(&b.id));
        zombies.sort_by(|a, b| a.id.cmp(&b.id));
        metrics::update_roster(active.len(), zombies.len());
        (active, zombies)
    }
}
