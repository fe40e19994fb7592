use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use siteaudit::config::Config;
use siteaudit::coordinator::{
    connect_pool, DistributedLock, EventBus, RedisEventTransport, RedisKv, WorkerMachine,
    WorkerRoster, WorkerRunner,
};
use siteaudit::crawler::ReqwestTransport;
use siteaudit::review::ReviewPipeline;
use siteaudit::storage::{JsonFileStore, MemoryReviewStore, ReviewStore};

pub async fn work(
    config: Config,
    worker_id: String,
    urls: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    println!("siteaudit worker {worker_id}");
    println!("========================");

    let pool = connect_pool(&config.redis).await?;

    let transport = Arc::new(ReqwestTransport::new(&config.crawler)?);
    let pipeline = Arc::new(ReviewPipeline::from_config(&config, transport)?);

    let store: Arc<dyn ReviewStore> = match &output {
        Some(dir) => Arc::new(JsonFileStore::new(dir).await?),
        None => Arc::new(MemoryReviewStore::new()),
    };

    let lock = DistributedLock::from_config(Arc::new(RedisKv::new(pool.clone())), &config.lock);
    let events = RedisEventTransport::new(pool, &config.redis.url)?;
    let bus = Arc::new(EventBus::new(
        config.events.channel.clone(),
        Arc::new(events.clone()),
        config.throttle_windows(),
    ));

    // Fleet view: worker-status events from every process feed the roster.
    let roster = WorkerRoster::new(config.worker.zombie_threshold_secs);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    bus.subscribe(&config.events.channel, "roster", move |message| {
        let _ = status_tx.send(message.clone());
    });
    let roster_task = {
        let roster = roster.clone();
        tokio::spawn(async move {
            while let Some(message) = status_rx.recv().await {
                roster.observe(&message).await;
            }
        })
    };
    let listener = events
        .listen(Arc::clone(&bus), &config.events.channel)
        .await
        .context("Failed to subscribe to event channel")?;

    let machine = WorkerMachine::new(worker_id.clone(), lock, Arc::clone(&bus));
    let mut runner = WorkerRunner::new(machine, pipeline, store, Arc::clone(&bus))
        .with_roster(roster.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = runner.spawn_heartbeat(
        Duration::from_secs(config.worker.heartbeat_interval_secs),
        shutdown_rx,
    );

    tokio::select! {
        summary = runner.run_all(&urls) => {
            println!();
            println!("Completed: {}", summary.completed);
            println!("Failed:    {}", summary.failed);
            println!("Skipped:   {}", summary.skipped);
            println!("Errors:    {}", summary.errors);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(worker = %worker_id, "Interrupted, held locks will lapse after their lease");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = heartbeat.await;
    listener.abort();
    bus.unsubscribe(&config.events.channel, "roster");
    roster_task.abort();

    let active = roster.active_workers().await;
    let zombies = roster.zombies().await;
    println!();
    println!("Fleet: {} active, {} zombie", active.len(), zombies.len());
    for worker in zombies {
        println!("  zombie {} (last seen {})", worker.id, worker.last_heartbeat);
    }

    Ok(())
}
