//! Mailstack Background Worker
//!
//! Handles scheduled jobs including:
//! - Wallet subscription renewal sweep (every 15 minutes)
//! - Stale pending checkout expiry (hourly)
//! - Invariant checks over billing state (daily at 2:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use mailstack_billing::{BillingService, ViolationSeverity};
use mailstack_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Mailstack Worker");

    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&database_url).await?;

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without Stripe and registrar config the sweeps cannot run;
            // stay alive so deployment health checks pass.
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Wallet renewal sweep (every 15 minutes)
    // Renews due wallet subscriptions, ends cancel_at_period_end terms and
    // cancels anything whose wallet cannot cover the renewal.
    let renewal_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let billing = renewal_billing.clone();
            Box::pin(async move {
                info!("Running wallet renewal sweep");
                let summary = billing.subscriptions.renew_due_wallet_subscriptions().await;
                info!(
                    renewed = summary.renewed,
                    cancelled_for_balance = summary.cancelled_for_balance,
                    term_ended = summary.term_ended,
                    errors = summary.errors,
                    "Wallet renewal sweep complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Wallet renewal sweep (every 15 minutes)");

    // Job 2: Expire stale pending checkouts (hourly)
    // A session Stripe never confirmed within 48 hours is dead; flipping it
    // to expired keeps the pending backlog meaningful.
    let expiry_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let pool = expiry_pool.clone();
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE transaction_history
                    SET status = 'expired', updated_at = NOW()
                    WHERE status = 'pending'
                      AND created_at < NOW() - INTERVAL '48 hours'
                    "#,
                )
                .execute(&pool)
                .await;

                match result {
                    Ok(r) => {
                        if r.rows_affected() > 0 {
                            info!(expired = r.rows_affected(), "Stale checkouts expired");
                        }
                    }
                    Err(e) => error!(error = %e, "Stale checkout expiry failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stale checkout expiry (hourly)");

    // Job 3: Invariant checks (daily at 2:00 AM UTC)
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) => {
                        info!(
                            checks_run = summary.checks_run,
                            checks_failed = summary.checks_failed,
                            healthy = summary.healthy,
                            "Invariant check run complete"
                        );
                        for violation in &summary.violations {
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => error!(
                                    invariant = %violation.invariant,
                                    severity = %violation.severity,
                                    description = %violation.description,
                                    affected_users = violation.user_ids.len(),
                                    "Billing invariant violated"
                                ),
                                ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                                    invariant = %violation.invariant,
                                    severity = %violation.severity,
                                    description = %violation.description,
                                    affected_users = violation.user_ids.len(),
                                    "Billing invariant warning"
                                ),
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invariant checks (daily at 2:00 AM UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Mailstack Worker started successfully with 4 scheduled jobs");

    // The scheduler runs jobs in background tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
