#![cfg_attr(test, allow(clippy::unwrap_used))]

//! MetaMind Background Worker
//!
//! Runs the ledger invariant sweep every hour and on startup. The sweep is
//! read-only: violations are logged by severity for an operator to act on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metamind_billing::{InvariantCheckSummary, InvariantChecker, ViolationSeverity};
use metamind_shared::{create_pool, PgStore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Log every violation at a level matching its severity
fn log_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(checks_run = summary.checks_run, "Invariant sweep passed");
        return;
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Invariant sweep found violations"
    );

    for violation in &summary.violations {
        let users = serde_json::to_string(&violation.user_ids).unwrap_or_default();
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                user_ids = %users,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                user_ids = %users,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Low => info!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                user_ids = %users,
                "{}",
                violation.description
            ),
        }
    }
}

/// One sweep; failures are logged and the next scheduled run tries again
async fn run_sweep(checker: &InvariantChecker) -> Option<InvariantCheckSummary> {
    match checker.run_all_checks().await {
        Ok(summary) => {
            log_summary(&summary);
            Some(summary)
        }
        Err(e) => {
            error!(error = %e, "Invariant sweep failed");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,metamind_worker=debug")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting MetaMind Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);
    let pool = create_pool(&database_url, max_connections).await?;
    info!("Database pool created");

    let checker = Arc::new(InvariantChecker::new(Arc::new(PgStore::new(pool))));

    run_sweep(&checker).await;

    let scheduler = JobScheduler::new().await?;

    // At minute 0 of every hour
    let hourly_checker = checker.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let checker = hourly_checker.clone();
            Box::pin(async move {
                info!("Running scheduled invariant sweep");
                run_sweep(&checker).await;
            })
        })?)
        .await?;
    info!("Scheduled: invariant sweep (hourly)");

    scheduler.start().await?;
    info!("MetaMind Worker started");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metamind_shared::{
        MemoryStore, NewPaymentRecord, PaymentLedger, PaymentStatus, ProfileStore, UserId,
    };

    #[tokio::test]
    async fn test_sweep_reports_unapplied_payment() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new();
        store.ensure_profile(user, None).await.unwrap();
        store
            .record_payment(&NewPaymentRecord::premium_pack(user, "pi_lost", PaymentStatus::Succeeded))
            .await
            .unwrap();

        let checker = InvariantChecker::new(store);
        let summary = run_sweep(&checker).await.unwrap();

        assert!(!summary.healthy);
        assert_eq!(summary.violations[0].severity, ViolationSeverity::Critical);
        assert_eq!(summary.violations[0].user_ids, vec![user.0]);
    }

    #[tokio::test]
    async fn test_sweep_on_clean_store() {
        let checker = InvariantChecker::new(Arc::new(MemoryStore::new()));
        assert!(run_sweep(&checker).await.unwrap().healthy);
    }
}
