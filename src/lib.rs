//! siteaudit - distributed web page auditor
//!
//! Workers crawl pages and audit them against configurable quality and SEO
//! rules. Each page goes through pluggable facters (extract facts) and
//! validators (score violations), with concurrent sub-fetches drained by a
//! fan-in barrier. Workers share one job stream and coordinate through
//! Redis: lease-based locks per URL and a throttled pub/sub event bus.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - URL rules, HTTP transport and fan-out fetch coordinator
//! - [`review`] - Facter/validator contract, built-in plugins and the review pipeline
//! - [`coordinator`] - Distributed lock, worker state machine, roster and event bus
//! - [`storage`] - Review persistence
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and domain error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use siteaudit::config::Config;
//! use siteaudit::crawler::ReqwestTransport;
//! use siteaudit::review::ReviewPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let transport = Arc::new(ReqwestTransport::new(&config.crawler)?);
//!     let pipeline = ReviewPipeline::from_config(&config, transport)?;
//!     let review = pipeline.run("https://example.com/").await?;
//!     println!("{} scored {}", review.url, review.score);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod review;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{
        BusMessage, DistributedLock, EventBus, StartOutcome, WorkerMachine, WorkerRoster,
        WorkerRunner,
    };
    pub use crate::crawler::{FetchCoordinator, FetchResponse, HttpTransport, ReqwestTransport};
    pub use crate::error::{AuditErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{Fact, Review, ReviewStatus, Violation};
    pub use crate::review::{Facter, ReviewContext, ReviewPipeline, Validator};
    pub use crate::storage::{MemoryReviewStore, ReviewStore};
}

// Direct re-exports for convenience
pub use models::{Fact, Review, ReviewStatus, Violation};
