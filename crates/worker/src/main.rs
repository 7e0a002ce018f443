// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Findawise Background Worker
//!
//! Handles scheduled jobs:
//! - Usage period rollover (hourly by default)
//! - Add-on renewal and expiry (hourly by default)
//! - Billing invariant checks (every 6 hours by default)

mod config;
mod jobs;

use std::sync::Arc;
use std::time::Duration;

use findawise_billing::{BillingService, PgStore};
use findawise_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Findawise Worker");

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::new(
        Arc::new(PgStore::new(pool)),
        config.billing.clone(),
    ));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Reset usage counters whose period has ended
    let rollover_billing = billing.clone();
    scheduler
        .add(Job::new_async(
            config.usage_rollover_cron.as_str(),
            move |_uuid, _l| {
                let billing = rollover_billing.clone();
                Box::pin(async move {
                    jobs::run_usage_rollover(&billing, OffsetDateTime::now_utc()).await;
                })
            },
        )?)
        .await?;
    info!(cron = %config.usage_rollover_cron, "Scheduled: Usage period rollover");

    // Job 2: Renew or expire lapsed add-ons
    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async(
            config.addon_expiry_cron.as_str(),
            move |_uuid, _l| {
                let billing = expiry_billing.clone();
                Box::pin(async move {
                    jobs::run_addon_expiry(&billing, OffsetDateTime::now_utc()).await;
                })
            },
        )?)
        .await?;
    info!(cron = %config.addon_expiry_cron, "Scheduled: Add-on expiry sweep");

    // Job 3: Consistency checks
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async(
            config.invariant_check_cron.as_str(),
            move |_uuid, _l| {
                let billing = invariant_billing.clone();
                Box::pin(async move {
                    jobs::run_invariant_sweep(&billing).await;
                })
            },
        )?)
        .await?;
    info!(cron = %config.invariant_check_cron, "Scheduled: Billing invariant checks");

    // Catch up on anything that lapsed while the worker was down
    let now = OffsetDateTime::now_utc();
    jobs::run_usage_rollover(&billing, now).await;
    jobs::run_addon_expiry(&billing, now).await;

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("Findawise Worker started with 3 scheduled jobs");

    // The scheduler runs jobs on background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
