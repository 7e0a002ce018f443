//! Usage ledger
//!
//! Per-user, per-resource counters for the current billing period. The gating
//! check and the increment are separate store calls, so two concurrent
//! requests can both pass the check and overshoot a limit by one. The limit is
//! soft on purpose; the counter update itself is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use findawise_shared::{add_months, roll_forward, LimitType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::addons::load_user_addons;
use crate::config::BillingConfig;
use crate::entitlement::{self, UsageCheck, UsageSummary};
use crate::error::{BillingError, BillingResult};
use crate::events::{UsageEventBuilder, UsageEventLogger};
use crate::models::{PricingTier, UsageEvent, UsageLimit, UserAddonWithProduct};
use crate::store::BillingStore;

/// Most events returned by one history call
pub const MAX_EVENT_PAGE: usize = 500;

/// Where an increment was charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bucket", rename_all = "snake_case")]
pub enum ChargedBucket {
    /// The user has no ledger row for the resource
    Untracked,
    /// The tier's base counter
    Base,
    /// Remaining capacity of a purchased add-on
    Addon { user_addon_id: Uuid },
}

/// Outcome of a successful increment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageIncrement {
    pub charged: ChargedBucket,
    /// Entitlement state after the unit was consumed
    pub usage: UsageCheck,
}

/// Usage counters and their audit trail
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
    events: UsageEventLogger,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        let events = UsageEventLogger::new(store.clone());
        Self {
            store,
            config,
            events,
        }
    }

    /// Limit rows whose period has not ended
    pub async fn get_user_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>> {
        let now = OffsetDateTime::now_utc();
        let limits = self
            .store
            .list_usage_limits(user_id)
            .await?
            .into_iter()
            .filter(|l| l.is_current(now))
            .collect::<Vec<_>>();

        tracing::debug!(user_id = %user_id, count = limits.len(), "Loaded usage limits");
        Ok(limits)
    }

    /// Whether the user may consume one more unit of `limit_type`
    pub async fn check_usage_limit(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
    ) -> BillingResult<UsageCheck> {
        let now = OffsetDateTime::now_utc();
        let Some(limit) = self.store.find_usage_limit(user_id, limit_type).await? else {
            return Ok(UsageCheck::unrestricted(limit_type));
        };

        let addons = load_user_addons(self.store.as_ref(), user_id).await?;
        let capacity = entitlement::addon_capacity_for(limit_type, &addons, now);
        let limit = self.effective(limit, now).await?;
        Ok(entitlement::check_limit(&limit, capacity))
    }

    /// Consume one unit.
    ///
    /// The base counter is charged until it reaches the tier limit; after that
    /// the unit is drawn from the oldest live add-on of the matching type.
    pub async fn increment_usage(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
        resource_type: &str,
        resource_id: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> BillingResult<UsageIncrement> {
        let now = OffsetDateTime::now_utc();

        let Some(stored) = self.store.find_usage_limit(user_id, limit_type).await? else {
            self.record(
                UsageEventBuilder::new(user_id, limit_type.usage_event())
                    .resource(resource_type, resource_id)
                    .data(metadata.unwrap_or_default())
                    .field(
                        "charged",
                        serde_json::to_value(ChargedBucket::Untracked).unwrap_or_default(),
                    ),
            )
            .await?;
            return Ok(UsageIncrement {
                charged: ChargedBucket::Untracked,
                usage: UsageCheck::unrestricted(limit_type),
            });
        };

        let limit = self.rollover_if_lapsed(stored, now).await?;
        let addons = load_user_addons(self.store.as_ref(), user_id).await?;
        let capacity = entitlement::addon_capacity_for(limit_type, &addons, now);
        let check = entitlement::check_limit(&limit, capacity);

        if !check.can_proceed && !check.is_unlimited {
            tracing::info!(
                user_id = %user_id,
                limit_type = %limit_type,
                current = check.current,
                total_capacity = check.total_capacity,
                "Usage limit exceeded"
            );
            return Err(BillingError::LimitExceeded {
                limit_type,
                current: check.current,
                limit: check.total_capacity,
            });
        }

        let (charged, updated, capacity) =
            if limit.is_unlimited() || limit.current_value < limit.limit_value {
                let updated = self.store.increment_usage_counter(limit.id).await?;
                (ChargedBucket::Base, updated, capacity)
            } else {
                match self.draw_from_addons(limit_type, &addons, now).await? {
                    Some(user_addon_id) => (
                        ChargedBucket::Addon { user_addon_id },
                        limit.clone(),
                        capacity - 1,
                    ),
                    None => {
                        // Lost a race for the last add-on unit
                        tracing::warn!(
                            user_id = %user_id,
                            limit_type = %limit_type,
                            "No add-on capacity left, charging base counter past its limit"
                        );
                        let updated = self.store.increment_usage_counter(limit.id).await?;
                        (ChargedBucket::Base, updated, capacity)
                    }
                }
            };

        let usage = entitlement::check_limit(&updated, capacity);
        if usage.approaching_limit {
            tracing::warn!(
                user_id = %user_id,
                limit_type = %limit_type,
                percentage = usage.percentage,
                "Usage crossed soft cap"
            );
        }

        self.record(
            UsageEventBuilder::new(user_id, limit_type.usage_event())
                .resource(resource_type, resource_id)
                .data(metadata.unwrap_or_default())
                .field("charged", serde_json::to_value(charged).unwrap_or_default()),
        )
        .await?;

        Ok(UsageIncrement { charged, usage })
    }

    /// Release one unit of the base counter, floored at zero.
    /// Returns `None` when the user has no row for the resource.
    pub async fn decrement_usage(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
        resource_type: &str,
        resource_id: Option<String>,
    ) -> BillingResult<Option<UsageLimit>> {
        let Some(limit) = self.store.find_usage_limit(user_id, limit_type).await? else {
            return Ok(None);
        };

        let updated = self.store.decrement_usage_counter(limit.id).await?;

        if let Some(event_type) = limit_type.deletion_event() {
            self.record(
                UsageEventBuilder::new(user_id, event_type).resource(resource_type, resource_id),
            )
            .await?;
        }

        tracing::debug!(
            user_id = %user_id,
            limit_type = %limit_type,
            current = updated.current_value,
            "Decremented usage"
        );
        Ok(Some(updated))
    }

    /// Zero every counter and start a new period aligned with the user's subscription
    pub async fn reset_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>> {
        let now = OffsetDateTime::now_utc();
        let (start, end) = self.period_for(user_id, now).await?;
        let limits = self
            .store
            .reset_usage_counters(user_id, start, end, now)
            .await?;

        tracing::info!(user_id = %user_id, count = limits.len(), "Reset usage limits");
        Ok(limits)
    }

    /// Replace the user's rows with fresh zeroed counters for the tier
    pub async fn initialize_usage_limits(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
    ) -> BillingResult<Vec<UsageLimit>> {
        let tier = self
            .store
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", tier_id)))?;
        let now = OffsetDateTime::now_utc();
        let (start, end) = self.period_for(user_id, now).await?;
        self.initialize_for_period(user_id, &tier, start, end).await
    }

    pub(crate) async fn initialize_for_period(
        &self,
        user_id: Uuid,
        tier: &PricingTier,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<Vec<UsageLimit>> {
        let now = OffsetDateTime::now_utc();
        let rows = LimitType::ALL
            .iter()
            .filter_map(|&limit_type| {
                tier.limit_for(limit_type).map(|limit_value| UsageLimit {
                    id: Uuid::new_v4(),
                    user_id,
                    limit_type,
                    limit_value,
                    current_value: 0,
                    soft_cap_threshold: self.config.default_soft_cap_threshold,
                    period_start,
                    period_end,
                    last_reset_at: now,
                })
            })
            .collect();

        let limits = self.store.replace_usage_limits(user_id, rows).await?;

        tracing::info!(
            user_id = %user_id,
            tier = %tier.slug,
            count = limits.len(),
            "Initialized usage limits"
        );
        Ok(limits)
    }

    /// Percentages and soft-cap warnings for every current limit
    pub async fn get_usage_summary(&self, user_id: Uuid) -> BillingResult<UsageSummary> {
        let now = OffsetDateTime::now_utc();
        let limits = self.get_user_usage_limits(user_id).await?;
        let addons = load_user_addons(self.store.as_ref(), user_id).await?;
        Ok(entitlement::summarize(limits, &addons, now))
    }

    /// Audit history, newest first
    pub async fn list_usage_events(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> BillingResult<Vec<UsageEvent>> {
        self.events
            .recent(user_id, limit.clamp(1, MAX_EVENT_PAGE))
            .await
    }

    /// Reset every row whose period ended before `now`, advancing its window
    /// by whole billing cycles. Returns the number of rows reset.
    pub async fn rollover_expired_periods(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let lapsed = self.store.list_lapsed_usage_limits(now).await?;
        let mut cycle_months: HashMap<Uuid, u32> = HashMap::new();
        let mut reset = 0;

        for limit in lapsed {
            let months = match cycle_months.get(&limit.user_id) {
                Some(months) => *months,
                None => {
                    let months = self.cycle_months(limit.user_id).await?;
                    cycle_months.insert(limit.user_id, months);
                    months
                }
            };

            let (start, end) = roll_forward(limit.period_start, limit.period_end, months, now);
            self.store
                .reset_usage_limit(limit.id, start, end, now)
                .await?;
            reset += 1;
        }

        if reset > 0 {
            tracing::info!(count = reset, "Rolled over lapsed usage periods");
        }
        Ok(reset)
    }

    /// Months in one billing cycle of the user's subscription; one without a subscription
    async fn cycle_months(&self, user_id: Uuid) -> BillingResult<u32> {
        Ok(self
            .store
            .find_current_subscription(user_id)
            .await?
            .map_or(1, |s| s.billing_cycle.months()))
    }

    /// View of a row as of `now`: a lapsed period counts as a fresh one,
    /// advanced by whole billing cycles
    async fn effective(&self, limit: UsageLimit, now: OffsetDateTime) -> BillingResult<UsageLimit> {
        if limit.is_current(now) {
            return Ok(limit);
        }
        let months = self.cycle_months(limit.user_id).await?;
        let (period_start, period_end) =
            roll_forward(limit.period_start, limit.period_end, months, now);
        Ok(UsageLimit {
            current_value: 0,
            period_start,
            period_end,
            last_reset_at: now,
            ..limit
        })
    }

    async fn rollover_if_lapsed(
        &self,
        limit: UsageLimit,
        now: OffsetDateTime,
    ) -> BillingResult<UsageLimit> {
        if limit.is_current(now) {
            return Ok(limit);
        }
        let fresh = self.effective(limit.clone(), now).await?;
        tracing::debug!(
            user_id = %limit.user_id,
            limit_type = %limit.limit_type,
            "Rolling over lapsed usage period"
        );
        self.store
            .reset_usage_limit(limit.id, fresh.period_start, fresh.period_end, now)
            .await
    }

    /// Charge one unit to the oldest live add-on with capacity left
    async fn draw_from_addons(
        &self,
        limit_type: LimitType,
        addons: &[UserAddonWithProduct],
        now: OffsetDateTime,
    ) -> BillingResult<Option<Uuid>> {
        let addon_type = limit_type.addon_type();
        let mut candidates: Vec<_> = addons
            .iter()
            .filter(|ua| {
                ua.addon.addon_type == addon_type
                    && ua.user_addon.is_live(now)
                    && ua.user_addon.remaining() > 0
            })
            .map(|ua| &ua.user_addon)
            .collect();
        candidates.sort_by_key(|ua| ua.purchased_at);

        for candidate in candidates {
            if let Some(consumed) = self.store.consume_user_addon_unit(candidate.id).await? {
                return Ok(Some(consumed.id));
            }
        }
        Ok(None)
    }

    /// Period for fresh counters: the current subscription's, else one month from now
    async fn period_for(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<(OffsetDateTime, OffsetDateTime)> {
        Ok(match self.store.find_current_subscription(user_id).await? {
            Some(sub) => (sub.current_period_start, sub.current_period_end),
            None => (now, add_months(now, 1)),
        })
    }

    /// Write the audit row; a failed write fails the operation
    async fn record(&self, builder: UsageEventBuilder) -> BillingResult<()> {
        if let Err(e) = self.events.log(builder).await {
            tracing::error!(error = %e, "Failed to record usage event");
            return Err(e);
        }
        Ok(())
    }
}
