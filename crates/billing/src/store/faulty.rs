//! Store wrapper that fails chosen writes
//!
//! Delegates to an [`InMemoryStore`] and returns `BillingError::Database` from
//! the writes switched off, for testing how services handle store failures.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use findawise_shared::{LimitType, TierSlug};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AddonRepository, InMemoryStore, InvariantRepository, ProductRepository,
    SubscriptionRepository, TierRepository, UsageRepository,
};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    AddonProduct, PricingTier, Product, ProrationCredit, Subscription, UsageEvent, UsageLimit,
    UserAddon,
};

pub struct FaultyStore {
    inner: InMemoryStore,
    fail_event_writes: AtomicBool,
    fail_subscription_updates: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_event_writes: AtomicBool::new(false),
            fail_subscription_updates: AtomicBool::new(false),
        }
    }

    pub fn fail_event_writes(&self, fail: bool) {
        self.fail_event_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscription_updates(&self, fail: bool) {
        self.fail_subscription_updates.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, table: &str) -> BillingResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(BillingError::Database(format!("write to {} refused", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl TierRepository for FaultyStore {
    async fn list_tiers(&self) -> BillingResult<Vec<PricingTier>> {
        self.inner.list_tiers().await
    }

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<PricingTier>> {
        self.inner.get_tier(id).await
    }

    async fn get_tier_by_slug(&self, slug: TierSlug) -> BillingResult<Option<PricingTier>> {
        self.inner.get_tier_by_slug(slug).await
    }

    async fn upsert_tier(&self, tier: PricingTier) -> BillingResult<PricingTier> {
        self.inner.upsert_tier(tier).await
    }
}

#[async_trait]
impl AddonRepository for FaultyStore {
    async fn list_addon_products(&self) -> BillingResult<Vec<AddonProduct>> {
        self.inner.list_addon_products().await
    }

    async fn get_addon_product(&self, id: Uuid) -> BillingResult<Option<AddonProduct>> {
        self.inner.get_addon_product(id).await
    }

    async fn upsert_addon_product(&self, product: AddonProduct) -> BillingResult<AddonProduct> {
        self.inner.upsert_addon_product(product).await
    }

    async fn list_user_addons(&self, user_id: Uuid) -> BillingResult<Vec<UserAddon>> {
        self.inner.list_user_addons(user_id).await
    }

    async fn get_user_addon(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        self.inner.get_user_addon(id).await
    }

    async fn find_active_user_addon(&self, user_id: Uuid, addon_id: Uuid) -> BillingResult<Option<UserAddon>> {
        self.inner.find_active_user_addon(user_id, addon_id).await
    }

    async fn insert_user_addon(&self, addon: UserAddon) -> BillingResult<UserAddon> {
        self.inner.insert_user_addon(addon).await
    }

    async fn update_user_addon(&self, addon: &UserAddon) -> BillingResult<UserAddon> {
        self.inner.update_user_addon(addon).await
    }

    async fn consume_user_addon_unit(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        self.inner.consume_user_addon_unit(id).await
    }

    async fn list_lapsed_user_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<UserAddon>> {
        self.inner.list_lapsed_user_addons(now).await
    }
}

#[async_trait]
impl UsageRepository for FaultyStore {
    async fn list_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>> {
        self.inner.list_usage_limits(user_id).await
    }

    async fn find_usage_limit(&self, user_id: Uuid, limit_type: LimitType) -> BillingResult<Option<UsageLimit>> {
        self.inner.find_usage_limit(user_id, limit_type).await
    }

    async fn replace_usage_limits(&self, user_id: Uuid, limits: Vec<UsageLimit>) -> BillingResult<Vec<UsageLimit>> {
        self.inner.replace_usage_limits(user_id, limits).await
    }

    async fn increment_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        self.inner.increment_usage_counter(id).await
    }

    async fn decrement_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        self.inner.decrement_usage_counter(id).await
    }

    async fn reset_usage_counters(&self, user_id: Uuid, period_start: OffsetDateTime, period_end: OffsetDateTime, reset_at: OffsetDateTime) -> BillingResult<Vec<UsageLimit>> {
        self.inner.reset_usage_counters(user_id, period_start, period_end, reset_at).await
    }

    async fn reset_usage_limit(&self, id: Uuid, period_start: OffsetDateTime, period_end: OffsetDateTime, reset_at: OffsetDateTime) -> BillingResult<UsageLimit> {
        self.inner.reset_usage_limit(id, period_start, period_end, reset_at).await
    }

    async fn list_lapsed_usage_limits(&self, now: OffsetDateTime) -> BillingResult<Vec<UsageLimit>> {
        self.inner.list_lapsed_usage_limits(now).await
    }

    async fn insert_usage_event(&self, event: UsageEvent) -> BillingResult<UsageEvent> {
        Self::check(&self.fail_event_writes, "usage_events")?;
        self.inner.insert_usage_event(event).await
    }

    async fn list_usage_events(&self, user_id: Uuid, limit: usize) -> BillingResult<Vec<UsageEvent>> {
        self.inner.list_usage_events(user_id, limit).await
    }
}

#[async_trait]
impl SubscriptionRepository for FaultyStore {
    async fn insert_subscription(&self, subscription: Subscription) -> BillingResult<Subscription> {
        self.inner.insert_subscription(subscription).await
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        self.inner.get_subscription(id).await
    }

    async fn find_current_subscription(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        self.inner.find_current_subscription(user_id).await
    }

    async fn update_subscription(&self, subscription: &Subscription) -> BillingResult<Subscription> {
        Self::check(&self.fail_subscription_updates, "subscriptions")?;
        self.inner.update_subscription(subscription).await
    }

    async fn insert_credit(&self, credit: ProrationCredit) -> BillingResult<ProrationCredit> {
        self.inner.insert_credit(credit).await
    }

    async fn list_credits(&self, user_id: Uuid) -> BillingResult<Vec<ProrationCredit>> {
        self.inner.list_credits(user_id).await
    }
}

#[async_trait]
impl ProductRepository for FaultyStore {
    async fn list_products(&self) -> BillingResult<Vec<Product>> {
        self.inner.list_products().await
    }

    async fn get_product_by_slug(&self, slug: &str) -> BillingResult<Option<Product>> {
        self.inner.get_product_by_slug(slug).await
    }
}

#[async_trait]
impl InvariantRepository for FaultyStore {
    async fn usage_over_limit(&self) -> BillingResult<Vec<UsageLimit>> {
        self.inner.usage_over_limit().await
    }

    async fn invalid_soft_caps(&self) -> BillingResult<Vec<UsageLimit>> {
        self.inner.invalid_soft_caps().await
    }

    async fn duplicate_active_addons(&self) -> BillingResult<Vec<(Uuid, Uuid, i64)>> {
        self.inner.duplicate_active_addons().await
    }

    async fn negative_credits(&self) -> BillingResult<Vec<ProrationCredit>> {
        self.inner.negative_credits().await
    }

    async fn users_with_multiple_subscriptions(&self) -> BillingResult<Vec<(Uuid, i64)>> {
        self.inner.users_with_multiple_subscriptions().await
    }
}
