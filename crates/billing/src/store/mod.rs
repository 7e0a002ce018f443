//! Data-store port
//!
//! The services never talk to a database directly. They receive an
//! `Arc<dyn BillingStore>` at construction; [`InMemoryStore`] backs tests and
//! demo deployments, [`PgStore`] backs production.

#[cfg(test)]
mod faulty;
mod memory;
mod postgres;

#[cfg(test)]
pub(crate) use faulty::FaultyStore;
pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use findawise_shared::{LimitType, TierSlug};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{
    AddonProduct, PricingTier, Product, ProrationCredit, Subscription, UsageEvent, UsageLimit,
    UserAddon,
};

/// Pricing tier reference data
#[async_trait]
pub trait TierRepository: Send + Sync {
    /// All tiers, ordered by sort order
    async fn list_tiers(&self) -> BillingResult<Vec<PricingTier>>;

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<PricingTier>>;

    async fn get_tier_by_slug(&self, slug: TierSlug) -> BillingResult<Option<PricingTier>>;

    /// Insert or replace by id (administrative seeding)
    async fn upsert_tier(&self, tier: PricingTier) -> BillingResult<PricingTier>;
}

/// Add-on products and user purchases
#[async_trait]
pub trait AddonRepository: Send + Sync {
    async fn list_addon_products(&self) -> BillingResult<Vec<AddonProduct>>;

    async fn get_addon_product(&self, id: Uuid) -> BillingResult<Option<AddonProduct>>;

    async fn upsert_addon_product(&self, product: AddonProduct) -> BillingResult<AddonProduct>;

    /// Every purchase of the user, newest first
    async fn list_user_addons(&self, user_id: Uuid) -> BillingResult<Vec<UserAddon>>;

    async fn get_user_addon(&self, id: Uuid) -> BillingResult<Option<UserAddon>>;

    /// The user's `active` purchase of a product, if any
    async fn find_active_user_addon(
        &self,
        user_id: Uuid,
        addon_id: Uuid,
    ) -> BillingResult<Option<UserAddon>>;

    async fn insert_user_addon(&self, addon: UserAddon) -> BillingResult<UserAddon>;

    /// Persist status, renewal, expiry and usage fields
    async fn update_user_addon(&self, addon: &UserAddon) -> BillingResult<UserAddon>;

    /// Atomically consume one unit if the purchase still has capacity.
    /// Returns `None` when it is already exhausted.
    async fn consume_user_addon_unit(&self, id: Uuid) -> BillingResult<Option<UserAddon>>;

    /// Active purchases whose expiry is at or before `now`
    async fn list_lapsed_user_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<UserAddon>>;
}

/// Usage counters and their audit trail
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn list_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>>;

    async fn find_usage_limit(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
    ) -> BillingResult<Option<UsageLimit>>;

    /// Drop the user's rows and write a fresh set
    async fn replace_usage_limits(
        &self,
        user_id: Uuid,
        limits: Vec<UsageLimit>,
    ) -> BillingResult<Vec<UsageLimit>>;

    /// Atomic `current_value + 1`
    async fn increment_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit>;

    /// Atomic `current_value - 1`, floored at zero
    async fn decrement_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit>;

    /// Zero every counter of the user and assign the given period
    async fn reset_usage_counters(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<Vec<UsageLimit>>;

    /// Zero one counter and assign the given period
    async fn reset_usage_limit(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<UsageLimit>;

    /// Rows whose period ended before `now`
    async fn list_lapsed_usage_limits(&self, now: OffsetDateTime) -> BillingResult<Vec<UsageLimit>>;

    async fn insert_usage_event(&self, event: UsageEvent) -> BillingResult<UsageEvent>;

    /// Most recent events first
    async fn list_usage_events(&self, user_id: Uuid, limit: usize) -> BillingResult<Vec<UsageEvent>>;
}

/// Subscriptions and proration credits
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert_subscription(&self, subscription: Subscription) -> BillingResult<Subscription>;

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    /// The user's subscription in `active`, `trialing` or `past_due` state
    async fn find_current_subscription(&self, user_id: Uuid)
        -> BillingResult<Option<Subscription>>;

    async fn update_subscription(&self, subscription: &Subscription) -> BillingResult<Subscription>;

    async fn insert_credit(&self, credit: ProrationCredit) -> BillingResult<ProrationCredit>;

    /// Newest first
    async fn list_credits(&self, user_id: Uuid) -> BillingResult<Vec<ProrationCredit>>;
}

/// Marketplace listings
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list_products(&self) -> BillingResult<Vec<Product>>;

    async fn get_product_by_slug(&self, slug: &str) -> BillingResult<Option<Product>>;
}

/// Read-only consistency queries used by the invariant checker
#[async_trait]
pub trait InvariantRepository: Send + Sync {
    /// Limited counters whose value exceeds the limit
    async fn usage_over_limit(&self) -> BillingResult<Vec<UsageLimit>>;

    /// Rows with a soft cap outside (0, 1]
    async fn invalid_soft_caps(&self) -> BillingResult<Vec<UsageLimit>>;

    /// `(user_id, addon_id, count)` for non-stackable products with more than one active purchase
    async fn duplicate_active_addons(&self) -> BillingResult<Vec<(Uuid, Uuid, i64)>>;

    async fn negative_credits(&self) -> BillingResult<Vec<ProrationCredit>>;

    /// `(user_id, count)` for users with more than one current subscription
    async fn users_with_multiple_subscriptions(&self) -> BillingResult<Vec<(Uuid, i64)>>;
}

/// Everything the billing services need from storage
pub trait BillingStore:
    TierRepository
    + AddonRepository
    + UsageRepository
    + SubscriptionRepository
    + ProductRepository
    + InvariantRepository
{
}

impl<T> BillingStore for T where
    T: TierRepository
        + AddonRepository
        + UsageRepository
        + SubscriptionRepository
        + ProductRepository
        + InvariantRepository
{
}
