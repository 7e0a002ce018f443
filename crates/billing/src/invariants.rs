//! Billing Invariants Module
//!
//! Runnable consistency checks over the usage, add-on and subscription
//! tables. They only read, so the worker can run them on a schedule and an
//! operator can run them after a manual data fix.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money is wrong
    Critical,
    /// Entitlements are wrong
    High,
    /// Configuration drift
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

/// Service for running billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    store: Arc<dyn BillingStore>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Names of every check `run_all_checks` performs
    pub fn available_checks() -> &'static [&'static str] {
        &[
            "single_current_subscription",
            "non_negative_credits",
            "usage_within_limit",
            "non_stackable_addon_unique",
            "soft_cap_in_range",
        ]
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_current_subscription().await?);
        violations.extend(self.check_non_negative_credits().await?);
        violations.extend(self.check_usage_within_limit().await?);
        violations.extend(self.check_non_stackable_addon_unique().await?);
        violations.extend(self.check_soft_cap_in_range().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        if violations.is_empty() {
            tracing::info!(checks_run, "Billing invariants hold");
        } else {
            for v in &violations {
                tracing::warn!(
                    invariant = %v.invariant,
                    severity = %v.severity,
                    users = ?v.user_ids,
                    "{}",
                    v.description
                );
            }
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// At most one subscription per user in active, trialing or past_due
    async fn check_single_current_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.users_with_multiple_subscriptions().await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, count)| InvariantViolation {
                invariant: "single_current_subscription".to_string(),
                user_ids: vec![user_id],
                description: format!("User has {} current subscriptions (expected 1)", count),
                context: serde_json::json!({ "subscription_count": count }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    async fn check_non_negative_credits(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.negative_credits().await?;

        Ok(rows
            .into_iter()
            .map(|credit| InvariantViolation {
                invariant: "non_negative_credits".to_string(),
                user_ids: vec![credit.user_id],
                description: format!(
                    "Proration credit {} has negative amount {}",
                    credit.id, credit.credit_amount
                ),
                context: serde_json::json!({
                    "credit_id": credit.id,
                    "subscription_id": credit.subscription_id,
                    "credit_amount": credit.credit_amount,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Base counters never pass their limit; overflow is charged to add-ons
    /// or, with none left, is a soft overshoot worth flagging.
    async fn check_usage_within_limit(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.usage_over_limit().await?;

        Ok(rows
            .into_iter()
            .map(|limit| InvariantViolation {
                invariant: "usage_within_limit".to_string(),
                user_ids: vec![limit.user_id],
                description: format!(
                    "{} counter at {} exceeds limit {}",
                    limit.limit_type.display_name(),
                    limit.current_value,
                    limit.limit_value
                ),
                context: serde_json::json!({
                    "usage_limit_id": limit.id,
                    "limit_type": limit.limit_type,
                    "current_value": limit.current_value,
                    "limit_value": limit.limit_value,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    async fn check_non_stackable_addon_unique(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.duplicate_active_addons().await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, addon_id, count)| InvariantViolation {
                invariant: "non_stackable_addon_unique".to_string(),
                user_ids: vec![user_id],
                description: format!(
                    "User holds {} active purchases of non-stackable add-on {}",
                    count, addon_id
                ),
                context: serde_json::json!({ "addon_id": addon_id, "active_count": count }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    async fn check_soft_cap_in_range(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.invalid_soft_caps().await?;

        Ok(rows
            .into_iter()
            .map(|limit| InvariantViolation {
                invariant: "soft_cap_in_range".to_string(),
                user_ids: vec![limit.user_id],
                description: format!(
                    "Soft cap threshold {} on {} is outside (0, 1]",
                    limit.soft_cap_threshold,
                    limit.limit_type.as_str()
                ),
                context: serde_json::json!({
                    "usage_limit_id": limit.id,
                    "soft_cap_threshold": limit.soft_cap_threshold,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }
}
