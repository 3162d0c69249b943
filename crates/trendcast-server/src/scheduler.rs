//! Background job scheduler.
//!
//! Runs the window aggregation pass on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use trendcast_engine::{Shutdown, WindowAggregator};

/// Builds and starts the scheduler with the aggregation job registered.
///
/// The returned handle must be kept alive for the lifetime of the process
/// and shut down on exit.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    aggregator: Arc<WindowAggregator>,
    shutdown: Shutdown,
    interval_secs: u64,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_aggregation_job(&scheduler, aggregator, shutdown, interval_secs).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_aggregation_job(
    scheduler: &JobScheduler,
    aggregator: Arc<WindowAggregator>,
    shutdown: Shutdown,
    interval_secs: u64,
) -> Result<(), JobSchedulerError> {
    let policy = aggregator.policy();
    let job = Job::new_repeated_async(
        Duration::from_secs(interval_secs),
        move |_uuid, _lock| {
            let aggregator = Arc::clone(&aggregator);
            let shutdown = shutdown.clone();

            Box::pin(async move {
                if let Some(result) = aggregator.tick(&shutdown).await {
                    tracing::debug!(
                        ranked = result.ranked,
                        evicted = result.evicted,
                        "scheduler: aggregation tick done"
                    );
                }
            })
        },
    )?;

    scheduler.add(job).await?;
    tracing::info!(%policy, interval_secs, "scheduler: aggregation job registered");
    Ok(())
}
