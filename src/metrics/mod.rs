//! Prometheus metrics for siteaudit workers
//!
//! Two families are registered in the default registry:
//! - Reviews: outcomes by status, score distribution, phase duration, sub-fetches
//! - Coordination: lock outcomes, event bus dispatch and flush, worker roster
//!
//! Every recording function is a no-op until `init_metrics()` succeeded, so
//! library users and tests never need a registry.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all review metrics
struct ReviewMetrics {
    reviews: CounterVec,
    score: Histogram,
    duration: HistogramVec,
    fetches: Counter,
}

/// Container for all coordination metrics
struct CoordinationMetrics {
    lock_attempts: CounterVec,
    lock_releases: Counter,
    bus_dispatch: CounterVec,
    bus_flushed: Counter,
    active_workers: Gauge,
    zombie_workers: Gauge,
}

/// Global storage for review metrics
static REVIEW_METRICS: OnceLock<ReviewMetrics> = OnceLock::new();

/// Global storage for coordination metrics
static COORDINATION_METRICS: OnceLock<CoordinationMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register every metric with the default Prometheus registry
///
/// Only the first call does any work. On failure the worker keeps running
/// without metrics.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let review = ReviewMetrics {
        reviews: register_counter_vec!(
            "siteaudit_reviews_total",
            "Reviews finished, by terminal status",
            &["status"]
        )?,
        score: register_histogram!(
            "siteaudit_review_score",
            "Total violation points per completed review",
            vec![0.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0]
        )?,
        duration: register_histogram_vec!(
            "siteaudit_review_duration_seconds",
            "Time spent in each review phase in seconds",
            &["phase"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        fetches: register_counter!(
            "siteaudit_review_fetches_total",
            "Sub-fetches scheduled by facters and validators"
        )?,
    };

    let coordination = CoordinationMetrics {
        lock_attempts: register_counter_vec!(
            "siteaudit_lock_attempts_total",
            "Lock acquisition attempts by outcome",
            &["outcome"]
        )?,
        lock_releases: register_counter!(
            "siteaudit_lock_releases_total",
            "Lock releases that deleted a key"
        )?,
        bus_dispatch: register_counter_vec!(
            "siteaudit_bus_dispatch_total",
            "Inbound event bus frames by outcome",
            &["outcome"]
        )?,
        bus_flushed: register_counter!(
            "siteaudit_bus_flushed_total",
            "Buffered events handed to the transport"
        )?,
        active_workers: register_gauge!(
            "siteaudit_active_workers",
            "Workers with a fresh heartbeat"
        )?,
        zombie_workers: register_gauge!(
            "siteaudit_zombie_workers",
            "Workers whose heartbeat exceeded the threshold"
        )?,
    };

    REVIEW_METRICS
        .set(review)
        .map_err(|_| "Review metrics already initialized")?;
    COORDINATION_METRICS
        .set(coordination)
        .map_err(|_| "Coordination metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    REVIEW_METRICS.get().is_some() && COORDINATION_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a review reaching a terminal status
pub fn record_review(status: &str, score: u64, fetches: u64) {
    let Some(m) = REVIEW_METRICS.get() else {
        return;
    };

    m.reviews.with_label_values(&[status]).inc();
    if status == "COMPLETED" {
        m.score.observe(score as f64);
    }
    if fetches > 0 {
        m.fetches.inc_by(fetches as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a timer for one review phase (`facts`, `validators`)
pub fn start_phase_timer(phase: &str) -> MetricsTimer {
    match REVIEW_METRICS.get() {
        Some(m) => MetricsTimer::new(m.duration.with_label_values(&[phase]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record a lock acquisition attempt
pub fn record_lock_attempt(acquired: bool) {
    if let Some(m) = COORDINATION_METRICS.get() {
        let outcome = if acquired { "acquired" } else { "contended" };
        m.lock_attempts.with_label_values(&[outcome]).inc();
    }
}

/// Record a lock release
pub fn record_lock_release(deleted: u64) {
    if let Some(m) = COORDINATION_METRICS.get() {
        if deleted > 0 {
            m.lock_releases.inc_by(deleted as f64);
        }
    }
}

/// Record an inbound bus frame outcome (`delivered`, `throttled`, `ignored`, `malformed`)
pub fn record_bus_dispatch(outcome: &str) {
    if let Some(m) = COORDINATION_METRICS.get() {
        m.bus_dispatch.with_label_values(&[outcome]).inc();
    }
}

/// Record a bus flush
pub fn record_bus_flush(sent: usize) {
    if let Some(m) = COORDINATION_METRICS.get() {
        if sent > 0 {
            m.bus_flushed.inc_by(sent as f64);
        }
    }
}

/// Update roster gauges
pub fn update_roster(active: usize, zombies: usize) {
    if let Some(m) = COORDINATION_METRICS.get() {
        m.active_workers.set(active as f64);
        m.zombie_workers.set(zombies as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
