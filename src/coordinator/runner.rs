//! Worker runner: one process working through assigned URLs
//!
//! For each URL the runner claims the lock, reviews the page, hands the
//! result to the store, releases the lock and flushes buffered events.
//! Lost lock races are skipped; the scheduler will hand the URL out again.
//!
//! ```text
//!  url ─▶ START ─contended─▶ skip
//!           │ started
//!           ▼
//!       pipeline.run ─▶ store.save ─▶ COMPLETE ─▶ bus.flush
//! ```

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::events::{BusMessage, EventBus};
use super::roster::WorkerRoster;
use super::worker::{StartOutcome, WorkerMachine};
use crate::error::{AuditErrorTrait, Error, Result};
use crate::models::{Review, ReviewStatus};
use crate::review::ReviewPipeline;
use crate::storage::ReviewStore;

/// Event type announcing a finished review
pub const REVIEW_FINISHED_EVENT: &str = "review-finished";

/// What happened to one assigned URL
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The page was reviewed (COMPLETED or FAILED) and stored
    Reviewed(Review),
    /// The lock was held elsewhere, or the worker was busy
    Skipped(StartOutcome),
}

/// Totals over a batch of URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped + self.errors
    }
}

/// Drives a [`WorkerMachine`] through assigned URLs
pub struct WorkerRunner {
    machine: WorkerMachine,
    pipeline: Arc<ReviewPipeline>,
    store: Arc<dyn ReviewStore>,
    bus: Arc<EventBus>,
    roster: Option<WorkerRoster>,
}

impl WorkerRunner {
    pub fn new(
        machine: WorkerMachine,
        pipeline: Arc<ReviewPipeline>,
        store: Arc<dyn ReviewStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            machine,
            pipeline,
            store,
            bus,
            roster: None,
        }
    }

    /// Also report this worker's heartbeats to a local roster
    #[must_use]
    pub fn with_roster(mut self, roster: WorkerRoster) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn machine(&self) -> &WorkerMachine {
        &self.machine
    }

    /// Review one URL under the lock
    ///
    /// The lock is released even when the review or the store fails; the
    /// original error is returned afterwards. A failed release is logged and
    /// does not discard the review: the worker is idle again and the lease
    /// expires on its own.
    pub async fn run_job(&mut self, url: &str) -> Result<JobOutcome> {
        match self.machine.start(url).await? {
            StartOutcome::Started => {}
            other => {
                self.bus.flush().await;
                return Ok(JobOutcome::Skipped(other));
            }
        }
        self.report_heartbeat().await;

        let outcome = self.review_and_store(url).await;

        if let Err(e) = self.machine.complete().await {
            tracing::warn!(
                worker = %self.machine.worker().id,
                url = %url,
                error = %e,
                "Release failed after review"
            );
        }
        self.report_heartbeat().await;
        self.bus.flush().await;

        outcome.map(JobOutcome::Reviewed)
    }

    async fn review_and_store(&self, url: &str) -> Result<Review> {
        let review = self.pipeline.run(url).await?;
        self.store.save(&review).await?;

        self.bus.publish(
            BusMessage::new(REVIEW_FINISHED_EVENT)
                .with("worker", self.machine.worker().id.clone())
                .with("review", review.id.to_string())
                .with("url", review.url.clone())
                .with("status", review.status.as_str())
                .with("score", review.score),
        );
        Ok(review)
    }

    /// Work through `urls` in order
    ///
    /// Per-URL failures are logged and counted; the batch continues.
    pub async fn run_all<S: AsRef<str>>(&mut self, urls: &[S]) -> RunSummary {
        let mut summary = RunSummary::default();

        for url in urls {
            let url = url.as_ref();
            match self.run_job(url).await {
                Ok(JobOutcome::Reviewed(review)) if review.status == ReviewStatus::Completed => {
                    summary.completed += 1;
                }
                Ok(JobOutcome::Reviewed(_)) => summary.failed += 1,
                Ok(JobOutcome::Skipped(reason)) => {
                    tracing::info!(url = %url, reason = ?reason, "Skipped URL");
                    summary.skipped += 1;
                }
                Err(e) => {
                    log_job_error(url, &e);
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            worker = %self.machine.worker().id,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            errors = summary.errors,
            "Batch finished"
        );
        summary
    }

    async fn report_heartbeat(&mut self) {
        let at = self.machine.heartbeat();
        if let Some(roster) = &self.roster {
            let worker = self.machine.worker();
            roster
                .heartbeat_at(&worker.id, worker.current_url.clone(), at)
                .await;
        }
    }

    /// Spawn a task that announces this worker's heartbeat every `period`
    ///
    /// Each heartbeat carries the worker's current state and URL, in the
    /// same shape as the transition events. The task stops when `shutdown`
    /// flips to true.
    pub fn spawn_heartbeat(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let status = self.machine.watch();
        let worker_id = self.machine.worker().id.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut worker = status.borrow().clone();
                        worker.heartbeat = Utc::now();
                        bus.publish(worker.status_message());
                        bus.flush().await;
                        tracing::debug!(worker = %worker_id, "Heartbeat sent");
                    }
                    _ = shutdown.changed() => {
                        tracing::info!(worker = %worker_id, "Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn log_job_error(url: &str, error: &Error) {
    if error.is_recoverable() {
        tracing::warn!(url = %url, category = %error.category(), error = %error, "Job failed, URL can be retried");
    } else {
        tracing::error!(url = %url, category = %error.category(), error = %error, "Job failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_total() {
        let summary = RunSummary {
            completed: 2,
            failed: 1,
            skipped: 3,
            errors: 1,
        };
        assert_eq!(summary.total(), 7);
    }
}
