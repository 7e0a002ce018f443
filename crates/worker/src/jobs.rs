//! Scheduled job bodies
//!
//! Each job logs its own outcome and never propagates errors, so one bad run
//! does not stop the scheduler.

use findawise_billing::{BillingService, InvariantCheckSummary, ViolationSeverity};
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Reset usage counters whose billing period has ended
pub async fn run_usage_rollover(billing: &BillingService, now: OffsetDateTime) -> Option<usize> {
    info!("Running usage period rollover");
    match billing.usage.rollover_expired_periods(now).await {
        Ok(reset) => {
            info!(reset = reset, "Usage period rollover complete");
            Some(reset)
        }
        Err(e) => {
            error!(error = %e, "Usage period rollover failed");
            None
        }
    }
}

/// Renew auto-renewing add-ons past their expiry and expire the rest
pub async fn run_addon_expiry(billing: &BillingService, now: OffsetDateTime) -> Option<(usize, usize)> {
    info!("Running add-on expiry sweep");
    match billing.addons.expire_addons(now).await {
        Ok(summary) => {
            info!(
                renewed = summary.renewed,
                expired = summary.expired,
                "Add-on expiry sweep complete"
            );
            Some((summary.renewed, summary.expired))
        }
        Err(e) => {
            error!(error = %e, "Add-on expiry sweep failed");
            None
        }
    }
}

/// Run every consistency check and log what it finds
pub async fn run_invariant_sweep(billing: &BillingService) -> Option<InvariantCheckSummary> {
    info!("Running billing invariant checks");
    match billing.invariants.run_all_checks().await {
        Ok(summary) => {
            log_invariant_summary(&summary);
            Some(summary)
        }
        Err(e) => {
            error!(error = %e, "Billing invariant checks failed to run");
            None
        }
    }
}

fn log_invariant_summary(summary: &InvariantCheckSummary) {
    info!(
        checks_run = summary.checks_run,
        checks_passed = summary.checks_passed,
        checks_failed = summary.checks_failed,
        healthy = summary.healthy,
        "Billing invariant checks complete"
    );

    for violation in &summary.violations {
        let users = violation.user_ids.len();
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                users = users,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                users = users,
                context = %violation.context,
                "{}",
                violation.description
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findawise_billing::catalog::{default_addons, default_tier_id};
    use findawise_billing::BillingConfig;
    use findawise_shared::{BillingCycle, TierSlug};
    use time::Duration;
    use uuid::Uuid;

    async fn subscribed_user(billing: &BillingService) -> Uuid {
        let user_id = Uuid::new_v4();
        billing
            .subscriptions
            .create_subscription(user_id, default_tier_id(TierSlug::Starter), BillingCycle::Monthly)
            .await
            .unwrap();
        user_id
    }

    #[tokio::test]
    async fn test_jobs_on_empty_store() {
        let billing = BillingService::in_memory(BillingConfig::default());
        let now = OffsetDateTime::now_utc();

        assert_eq!(run_usage_rollover(&billing, now).await, Some(0));
        assert_eq!(run_addon_expiry(&billing, now).await, Some((0, 0)));
        let summary = run_invariant_sweep(&billing).await.unwrap();
        assert!(summary.healthy);
    }

    #[tokio::test]
    async fn test_rollover_resets_lapsed_counters() {
        let billing = BillingService::in_memory(BillingConfig::default());
        let user_id = subscribed_user(&billing).await;

        billing
            .usage
            .increment_usage(user_id, findawise_shared::LimitType::Agents, "agent", None, None)
            .await
            .unwrap();

        let later = OffsetDateTime::now_utc() + Duration::days(40);
        let reset = run_usage_rollover(&billing, later).await.unwrap();
        assert!(reset > 0);

        // Second run in the same instant has nothing left to do
        assert_eq!(run_usage_rollover(&billing, later).await, Some(0));
    }

    #[tokio::test]
    async fn test_addon_expiry_renews_and_expires() {
        let billing = BillingService::in_memory(BillingConfig::default());
        let user_id = subscribed_user(&billing).await;
        let addons = default_addons();
        let id_of = |slug: &str| addons.iter().find(|a| a.slug == slug).unwrap().id;

        billing
            .addons
            .purchase_addon(user_id, id_of("workflow-pack-10"), 1, true)
            .await
            .unwrap();
        billing
            .addons
            .purchase_addon(user_id, id_of("agent-pack-5"), 1, false)
            .await
            .unwrap();

        let later = OffsetDateTime::now_utc() + Duration::days(45);
        assert_eq!(run_addon_expiry(&billing, later).await, Some((1, 1)));
    }
}
