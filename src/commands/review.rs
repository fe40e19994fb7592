use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use siteaudit::config::Config;
use siteaudit::coordinator::{
    DistributedLock, EventBus, JobOutcome, MemoryEventTransport, MemoryKv, WorkerMachine,
    WorkerRunner,
};
use siteaudit::crawler::ReqwestTransport;
use siteaudit::models::Review;
use siteaudit::review::{DefinitionRegistry, ReviewPipeline};
use siteaudit::storage::{JsonFileStore, MemoryReviewStore, ReviewStore};
use siteaudit::utils::truncate_text;

pub async fn review(config: Config, url: String, output: Option<PathBuf>, json: bool) -> Result<()> {
    let transport = Arc::new(ReqwestTransport::new(&config.crawler)?);
    let pipeline = Arc::new(ReviewPipeline::from_config(&config, transport)?);

    let store: Arc<dyn ReviewStore> = match &output {
        Some(dir) => Arc::new(JsonFileStore::new(dir).await?),
        None => Arc::new(MemoryReviewStore::new()),
    };

    let lock = DistributedLock::from_config(Arc::new(MemoryKv::new()), &config.lock);
    let bus = Arc::new(EventBus::new(
        config.events.channel.clone(),
        Arc::new(MemoryEventTransport::new()),
        config.throttle_windows(),
    ));
    let machine = WorkerMachine::new("local", lock, Arc::clone(&bus));
    let mut runner = WorkerRunner::new(machine, Arc::clone(&pipeline), store, bus);

    let review = match runner.run_job(&url).await? {
        JobOutcome::Reviewed(review) => review,
        JobOutcome::Skipped(reason) => anyhow::bail!("Review skipped: {reason:?}"),
    };

    if json {
        let encoded = serde_json::to_string_pretty(&review).context("Failed to encode review")?;
        println!("{encoded}");
    } else {
        print_review(&review, pipeline.registry());
    }

    if let Some(dir) = output {
        println!("Saved to {}", dir.join(format!("{}.json", review.id)).display());
    }

    Ok(())
}

fn print_review(review: &Review, registry: &DefinitionRegistry) {
    println!("Review {}", review.id);
    println!("========================");
    println!("  URL:    {}", review.url);
    println!("  Status: {}", review.status);

    if let Some(reason) = &review.failure {
        println!("  Reason: {reason}");
        return;
    }

    println!("  Score:  {}", review.score);

    println!();
    println!("Facts");
    println!("------------------------");
    for fact in &review.facts {
        let (title, value) = match registry.fact(&fact.key) {
            Some(definition) => (definition.title, definition.format_value(&fact.value)),
            None => (fact.key.as_str(), fact.value.to_string()),
        };
        let unit = fact.unit.as_deref().unwrap_or("");
        println!("  {title:<24} {} {unit}", truncate_text(&value, 60));
    }

    println!();
    println!("Violations");
    println!("------------------------");
    if review.violations.is_empty() {
        println!("  none");
    }
    for violation in &review.violations {
        let (title, value) = match registry.violation(&violation.key) {
            Some(definition) => (definition.title, definition.format_value(&violation.value)),
            None => (violation.key.as_str(), violation.value.to_string()),
        };
        println!(
            "  [{:>3}] {title:<32} {}",
            violation.points,
            truncate_text(&value, 60)
        );
    }
}
