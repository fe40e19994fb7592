//! Review persistence
//!
//! Finished reviews are handed to a [`ReviewStore`]. The real schema lives
//! outside this crate; [`MemoryReviewStore`] serves single-process runs and
//! tests, and [`JsonFileStore`] writes one JSON document per review.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Review;
use crate::utils::error::StoreError;

/// Destination for finished reviews
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Persist a review, replacing any earlier copy with the same id
    async fn save(&self, review: &Review) -> Result<(), StoreError>;

    /// Load a review by id
    async fn get(&self, id: Uuid) -> Result<Option<Review>, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps reviews in process memory
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    reviews: RwLock<HashMap<Uuid, Review>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored review for `url`, oldest first
    pub async fn for_url(&self, url: &str) -> Vec<Review> {
        let mut found: Vec<_> = self
            .reviews
            .read()
            .await
            .values()
            .filter(|r| r.url == url)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        found
    }

    pub async fn len(&self) -> usize {
        self.reviews.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn save(&self, review: &Review) -> Result<(), StoreError> {
        self.reviews.write().await.insert(review.id, review.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Review>, StoreError> {
        Ok(self.reviews.read().await.get(&id).cloned())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Writes `<output_dir>/<review id>.json`
pub struct JsonFileStore {
    output_dir: PathBuf,
}

impl JsonFileStore {
    /// Create the store, creating `output_dir` if needed
    pub async fn new(output_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            StoreError::Unavailable(format!("{}: {e}", output_dir.display()))
        })?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl ReviewStore for JsonFileStore {
    async fn save(&self, review: &Review) -> Result<(), StoreError> {
        let path = self.path_for(review.id);
        let json = serde_json::to_string_pretty(review)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Review written");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Review>, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        }
    }
}
