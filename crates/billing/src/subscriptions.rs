//! Subscription lifecycle and proration
//!
//! A user has at most one current subscription (`active`, `trialing` or
//! `past_due`). Users without one resolve to the free tier. Tier changes take
//! effect immediately: usage limits are re-initialized for the new tier, and an
//! upgrade credits the unused value of the old tier for the rest of the period.

use std::sync::Arc;

use findawise_shared::{days_ceil, period_end, BillingCycle, SubscriptionStatus, TierSlug};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::entitlement;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    FeatureMap, PricingTier, ProrationCredit, Subscription, SubscriptionWithTier, UsageLimit,
};
use crate::store::BillingStore;
use crate::usage::UsageLedger;

/// Side-effect free quote of a tier change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationPreview {
    pub subscription_id: Uuid,
    pub current_tier: TierSlug,
    pub new_tier: TierSlug,
    pub billing_cycle: BillingCycle,
    /// Current tier's price for one period of the subscription's cycle
    pub current_price: i64,
    pub new_price: i64,
    pub remaining_days: i64,
    pub total_days: i64,
    /// Credit an upgrade would issue; always 0 for a downgrade
    pub credit_amount: i64,
    pub is_upgrade: bool,
}

/// Result of an upgrade or downgrade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChange {
    pub subscription: SubscriptionWithTier,
    pub previous_tier: TierSlug,
    pub credit: Option<ProrationCredit>,
    pub usage_limits: Vec<UsageLimit>,
}

/// Credit for the unused part of a period, in cents.
///
/// `round(price / total_days * remaining_days)` with whole days rounded up,
/// computed in integers and rounded half up. Never negative.
pub fn calculate_proration_credit(
    period_price: i64,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
    now: OffsetDateTime,
) -> i64 {
    let total_days = days_ceil(period_start, period_end);
    if total_days <= 0 || period_price <= 0 {
        return 0;
    }
    let remaining_days = days_ceil(now, period_end).clamp(0, total_days);
    (period_price * remaining_days + total_days / 2) / total_days
}

fn is_current(status: SubscriptionStatus) -> bool {
    matches!(
        status,
        SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
    )
}

/// The tier gating decisions are made against: the current subscription's,
/// else the free tier
pub(crate) async fn resolve_user_tier(
    store: &dyn BillingStore,
    user_id: Uuid,
) -> BillingResult<PricingTier> {
    if let Some(sub) = store.find_current_subscription(user_id).await? {
        return store
            .get_tier(sub.tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", sub.tier_id)));
    }
    store
        .get_tier_by_slug(TierSlug::Free)
        .await?
        .ok_or_else(|| BillingError::NotFound("Free tier is not configured".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upgrade,
    Downgrade,
}

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
    ledger: UsageLedger,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig, ledger: UsageLedger) -> Self {
        Self {
            store,
            config,
            ledger,
        }
    }

    /// Start an `active` subscription and initialize the tier's usage limits
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        billing_cycle: BillingCycle,
    ) -> BillingResult<SubscriptionWithTier> {
        let tier = self.load_tier(tier_id).await?;
        if !tier.is_active {
            return Err(BillingError::InvalidTier(format!(
                "Tier '{}' is not available",
                tier.slug
            )));
        }

        if let Some(existing) = self.store.find_current_subscription(user_id).await? {
            return Err(BillingError::AlreadyActive(format!(
                "User already has subscription {}",
                existing.id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let subscription = self
            .store
            .insert_subscription(Subscription {
                id: Uuid::new_v4(),
                user_id,
                tier_id,
                status: SubscriptionStatus::Active,
                billing_cycle,
                current_period_start: now,
                current_period_end: period_end(now, billing_cycle),
                cancel_at_period_end: false,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.ledger
            .initialize_for_period(
                user_id,
                &tier,
                subscription.current_period_start,
                subscription.current_period_end,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            tier = %tier.slug,
            billing_cycle = %billing_cycle,
            "Created subscription"
        );

        Ok(SubscriptionWithTier { subscription, tier })
    }

    pub async fn get_subscription(&self, subscription_id: Uuid) -> BillingResult<SubscriptionWithTier> {
        let subscription = self.load_subscription(subscription_id).await?;
        let tier = self.load_tier(subscription.tier_id).await?;
        Ok(SubscriptionWithTier { subscription, tier })
    }

    /// The user's current subscription, if any
    pub async fn get_active_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionWithTier>> {
        let Some(subscription) = self.store.find_current_subscription(user_id).await? else {
            return Ok(None);
        };
        let tier = self.load_tier(subscription.tier_id).await?;
        Ok(Some(SubscriptionWithTier { subscription, tier }))
    }

    /// Cancel now, or flag for cancellation at the end of the period.
    /// The period-end transition itself belongs to the external billing system.
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        cancel_at_period_end: bool,
    ) -> BillingResult<Subscription> {
        let mut subscription = self.load_subscription(subscription_id).await?;
        if subscription.status.is_terminal() {
            return Err(BillingError::InvalidInput(format!(
                "Subscription {} is already canceled",
                subscription_id
            )));
        }

        if cancel_at_period_end {
            subscription.cancel_at_period_end = true;
        } else {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.cancel_at_period_end = false;
        }
        subscription.updated_at = OffsetDateTime::now_utc();
        let subscription = self.store.update_subscription(&subscription).await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription.id,
            immediate = !cancel_at_period_end,
            "Canceled subscription"
        );
        Ok(subscription)
    }

    /// Undo a pending period-end cancellation
    pub async fn reactivate_subscription(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        let mut subscription = self.load_subscription(subscription_id).await?;
        if subscription.status.is_terminal() {
            return Err(BillingError::InvalidInput(format!(
                "Subscription {} was canceled immediately and cannot be reactivated",
                subscription_id
            )));
        }
        if !subscription.cancel_at_period_end {
            return Ok(subscription);
        }

        subscription.cancel_at_period_end = false;
        subscription.updated_at = OffsetDateTime::now_utc();
        let subscription = self.store.update_subscription(&subscription).await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription.id,
            "Reactivated subscription"
        );
        Ok(subscription)
    }

    /// Move to a higher tier, crediting the unused value of the current one
    pub async fn upgrade_subscription_with_proration(
        &self,
        subscription_id: Uuid,
        new_tier_id: Uuid,
    ) -> BillingResult<TierChange> {
        self.change_tier(subscription_id, new_tier_id, Direction::Upgrade)
            .await
    }

    /// Move to a lower tier. No credit is issued.
    pub async fn downgrade_subscription_with_proration(
        &self,
        subscription_id: Uuid,
        new_tier_id: Uuid,
    ) -> BillingResult<TierChange> {
        self.change_tier(subscription_id, new_tier_id, Direction::Downgrade)
            .await
    }

    /// Quote a tier change as of `now` without writing anything
    pub async fn preview_proration(
        &self,
        subscription_id: Uuid,
        new_tier_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<ProrationPreview> {
        let subscription = self.load_subscription(subscription_id).await?;
        let current = self.load_tier(subscription.tier_id).await?;
        let target = self.load_tier(new_tier_id).await?;
        Ok(preview(&subscription, &current, &target, now))
    }

    pub async fn list_proration_credits(&self, user_id: Uuid) -> BillingResult<Vec<ProrationCredit>> {
        self.store.list_credits(user_id).await
    }

    /// The user's tier, falling back to free
    pub async fn get_user_tier(&self, user_id: Uuid) -> BillingResult<PricingTier> {
        resolve_user_tier(self.store.as_ref(), user_id).await
    }

    /// Whether the user's tier is at or above `required`
    pub async fn can_access_product(
        &self,
        user_id: Uuid,
        required: TierSlug,
    ) -> BillingResult<bool> {
        let tier = self.get_user_tier(user_id).await?;
        Ok(entitlement::tier_grants(tier.slug, required))
    }

    pub async fn get_user_features(&self, user_id: Uuid) -> BillingResult<FeatureMap> {
        Ok(self.get_user_tier(user_id).await?.features)
    }

    pub async fn can_access_feature(&self, user_id: Uuid, feature_key: &str) -> BillingResult<bool> {
        let features = self.get_user_features(user_id).await?;
        Ok(entitlement::can_access_feature(&features, feature_key))
    }

    async fn change_tier(
        &self,
        subscription_id: Uuid,
        new_tier_id: Uuid,
        direction: Direction,
    ) -> BillingResult<TierChange> {
        let mut subscription = self.load_subscription(subscription_id).await?;
        if !is_current(subscription.status) {
            return Err(BillingError::InvalidInput(format!(
                "Subscription {} is not active",
                subscription_id
            )));
        }

        let current = self.load_tier(subscription.tier_id).await?;
        let target = self.load_tier(new_tier_id).await?;
        if !target.is_active {
            return Err(BillingError::InvalidTier(format!(
                "Tier '{}' is not available",
                target.slug
            )));
        }

        let valid = match direction {
            Direction::Upgrade => target.slug.rank() > current.slug.rank(),
            Direction::Downgrade => target.slug.rank() < current.slug.rank(),
        };
        if !valid {
            return Err(BillingError::InvalidTier(format!(
                "Cannot {} from {} to {}",
                match direction {
                    Direction::Upgrade => "upgrade",
                    Direction::Downgrade => "downgrade",
                },
                current.slug,
                target.slug
            )));
        }

        let now = OffsetDateTime::now_utc();
        let quote = preview(&subscription, &current, &target, now);

        subscription.tier_id = target.id;
        subscription.cancel_at_period_end = false;
        subscription.updated_at = now;
        let subscription = self.store.update_subscription(&subscription).await?;

        // Credit only once the tier change is stored
        let credit = if direction == Direction::Upgrade && quote.credit_amount > 0 {
            let credit = self
                .store
                .insert_credit(ProrationCredit {
                    id: Uuid::new_v4(),
                    user_id: subscription.user_id,
                    subscription_id,
                    credit_amount: quote.credit_amount,
                    reason: format!(
                        "Unused {} time ({} of {} days) on upgrade to {}",
                        current.slug, quote.remaining_days, quote.total_days, target.slug
                    ),
                    is_applied: false,
                    expires_at: now + Duration::days(self.config.credit_validity_days),
                    created_at: now,
                })
                .await?;

            tracing::info!(
                user_id = %subscription.user_id,
                subscription_id = %subscription_id,
                credit_amount = credit.credit_amount,
                "Issued proration credit"
            );
            Some(credit)
        } else {
            if direction == Direction::Downgrade {
                tracing::info!(
                    user_id = %subscription.user_id,
                    subscription_id = %subscription_id,
                    "Downgrade issues no proration credit"
                );
            }
            None
        };

        let usage_limits = self
            .ledger
            .initialize_for_period(
                subscription.user_id,
                &target,
                subscription.current_period_start,
                subscription.current_period_end,
            )
            .await?;

        tracing::info!(
            user_id = %subscription.user_id,
            subscription_id = %subscription.id,
            from_tier = %current.slug,
            to_tier = %target.slug,
            "Changed subscription tier"
        );

        Ok(TierChange {
            subscription: SubscriptionWithTier {
                subscription,
                tier: target,
            },
            previous_tier: current.slug,
            credit,
            usage_limits,
        })
    }

    async fn load_subscription(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("Subscription {} not found", subscription_id))
            })
    }

    async fn load_tier(&self, tier_id: Uuid) -> BillingResult<PricingTier> {
        self.store
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", tier_id)))
    }
}

fn preview(
    subscription: &Subscription,
    current: &PricingTier,
    target: &PricingTier,
    now: OffsetDateTime,
) -> ProrationPreview {
    let cycle = subscription.billing_cycle;
    let start = subscription.current_period_start;
    let end = subscription.current_period_end;
    let total_days = days_ceil(start, end).max(0);
    let remaining_days = days_ceil(now, end).clamp(0, total_days);
    let current_price = current.price_for(cycle);
    let is_upgrade = target.slug.rank() > current.slug.rank();

    ProrationPreview {
        subscription_id: subscription.id,
        current_tier: current.slug,
        new_tier: target.slug,
        billing_cycle: cycle,
        current_price,
        new_price: target.price_for(cycle),
        remaining_days,
        total_days,
        credit_amount: if is_upgrade {
            calculate_proration_credit(current_price, start, end, now)
        } else {
            0
        },
        is_upgrade,
    }
}
