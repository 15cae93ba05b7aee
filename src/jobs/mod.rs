pub mod lifecycle;

use chrono::Utc;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

// sec min hour day month weekday
const BOOKING_SWEEP: &str = "0 */5 * * * *";
const MEMBERSHIP_SWEEP: &str = "0 0 * * * *";
const TOKEN_PURGE: &str = "0 0 3 * * *";

/// Registers the lifecycle jobs and starts the scheduler.
pub async fn start(pool: PgPool) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job_pool = pool.clone();
    scheduler
        .add(Job::new_async(BOOKING_SWEEP, move |_id, _scheduler| {
            let pool = job_pool.clone();
            Box::pin(async move {
                if let Err(e) = lifecycle::sweep_bookings(&pool, Utc::now()).await {
                    tracing::error!(error = %e, "Booking sweep failed");
                }
            })
        })?)
        .await?;

    let job_pool = pool.clone();
    scheduler
        .add(Job::new_async(MEMBERSHIP_SWEEP, move |_id, _scheduler| {
            let pool = job_pool.clone();
            Box::pin(async move {
                if let Err(e) = lifecycle::sweep_memberships(&pool, Utc::now()).await {
                    tracing::error!(error = %e, "Membership sweep failed");
                }
            })
        })?)
        .await?;

    let job_pool = pool;
    scheduler
        .add(Job::new_async(TOKEN_PURGE, move |_id, _scheduler| {
            let pool = job_pool.clone();
            Box::pin(async move {
                if let Err(e) = lifecycle::purge_refresh_tokens(&pool, Utc::now()).await {
                    tracing::error!(error = %e, "Refresh token purge failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Background jobs scheduled");

    Ok(scheduler)
}
