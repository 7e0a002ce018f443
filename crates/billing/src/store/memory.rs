//! In-memory store for tests and demo deployments

use std::collections::HashMap;

use async_trait::async_trait;
use findawise_shared::{AddonStatus, LimitType, SubscriptionStatus, TierSlug};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AddonRepository, InvariantRepository, ProductRepository, SubscriptionRepository,
    TierRepository, UsageRepository,
};
use crate::catalog;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    AddonProduct, PricingTier, Product, ProrationCredit, Subscription, UsageEvent, UsageLimit,
    UserAddon,
};

#[derive(Default)]
struct State {
    tiers: HashMap<Uuid, PricingTier>,
    addon_products: HashMap<Uuid, AddonProduct>,
    user_addons: HashMap<Uuid, UserAddon>,
    usage_limits: HashMap<Uuid, UsageLimit>,
    usage_events: Vec<UsageEvent>,
    subscriptions: HashMap<Uuid, Subscription>,
    credits: Vec<ProrationCredit>,
    products: Vec<Product>,
}

/// Hash-map backed [`BillingStore`](super::BillingStore).
///
/// Every mutation happens under one write lock, so counter updates are atomic
/// the same way a single SQL `UPDATE` is.
///
/// Usage events are kept in an append-only `Vec` that is never pruned; use it
/// for tests and short-lived demos, not long-running deployments.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the default tiers, add-ons and products
    pub fn with_default_catalog() -> Self {
        let state = State {
            tiers: catalog::default_tiers()
                .into_iter()
                .map(|t| (t.id, t))
                .collect(),
            addon_products: catalog::default_addons()
                .into_iter()
                .map(|a| (a.id, a))
                .collect(),
            products: catalog::default_products(),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Add a marketplace listing
    pub async fn insert_product(&self, product: Product) {
        self.state.write().await.products.push(product);
    }
}

fn missing(what: &str, id: Uuid) -> BillingError {
    BillingError::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl TierRepository for InMemoryStore {
    async fn list_tiers(&self) -> BillingResult<Vec<PricingTier>> {
        let state = self.state.read().await;
        let mut tiers: Vec<_> = state.tiers.values().cloned().collect();
        tiers.sort_by_key(|t| t.sort_order);
        Ok(tiers)
    }

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<PricingTier>> {
        Ok(self.state.read().await.tiers.get(&id).cloned())
    }

    async fn get_tier_by_slug(&self, slug: TierSlug) -> BillingResult<Option<PricingTier>> {
        Ok(self
            .state
            .read()
            .await
            .tiers
            .values()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn upsert_tier(&self, tier: PricingTier) -> BillingResult<PricingTier> {
        let mut state = self.state.write().await;
        if state
            .tiers
            .values()
            .any(|t| t.slug == tier.slug && t.id != tier.id)
        {
            return Err(BillingError::Database(format!(
                "duplicate tier slug '{}'",
                tier.slug
            )));
        }
        state.tiers.insert(tier.id, tier.clone());
        Ok(tier)
    }
}

#[async_trait]
impl AddonRepository for InMemoryStore {
    async fn list_addon_products(&self) -> BillingResult<Vec<AddonProduct>> {
        let state = self.state.read().await;
        let mut products: Vec<_> = state.addon_products.values().cloned().collect();
        products.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.slug.cmp(&b.slug)));
        Ok(products)
    }

    async fn get_addon_product(&self, id: Uuid) -> BillingResult<Option<AddonProduct>> {
        Ok(self.state.read().await.addon_products.get(&id).cloned())
    }

    async fn upsert_addon_product(&self, product: AddonProduct) -> BillingResult<AddonProduct> {
        self.state
            .write()
            .await
            .addon_products
            .insert(product.id, product.clone());
        Ok(product)
    }

    async fn list_user_addons(&self, user_id: Uuid) -> BillingResult<Vec<UserAddon>> {
        let state = self.state.read().await;
        let mut addons: Vec<_> = state
            .user_addons
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addons.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        Ok(addons)
    }

    async fn get_user_addon(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        Ok(self.state.read().await.user_addons.get(&id).cloned())
    }

    async fn find_active_user_addon(
        &self,
        user_id: Uuid,
        addon_id: Uuid,
    ) -> BillingResult<Option<UserAddon>> {
        Ok(self
            .state
            .read()
            .await
            .user_addons
            .values()
            .find(|a| {
                a.user_id == user_id && a.addon_id == addon_id && a.status == AddonStatus::Active
            })
            .cloned())
    }

    async fn insert_user_addon(&self, addon: UserAddon) -> BillingResult<UserAddon> {
        let mut state = self.state.write().await;
        if !state.addon_products.contains_key(&addon.addon_id) {
            return Err(BillingError::Database(format!(
                "foreign key violation: add-on product {} does not exist",
                addon.addon_id
            )));
        }
        state.user_addons.insert(addon.id, addon.clone());
        Ok(addon)
    }

    async fn update_user_addon(&self, addon: &UserAddon) -> BillingResult<UserAddon> {
        let mut state = self.state.write().await;
        let stored = state
            .user_addons
            .get_mut(&addon.id)
            .ok_or_else(|| missing("User add-on", addon.id))?;
        stored.status = addon.status;
        stored.auto_renew = addon.auto_renew;
        stored.expires_at = addon.expires_at;
        stored.usage_current = addon.usage_current;
        Ok(stored.clone())
    }

    async fn consume_user_addon_unit(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        let mut state = self.state.write().await;
        let stored = state
            .user_addons
            .get_mut(&id)
            .ok_or_else(|| missing("User add-on", id))?;
        if stored.usage_current >= stored.usage_limit {
            return Ok(None);
        }
        stored.usage_current += 1;
        Ok(Some(stored.clone()))
    }

    async fn list_lapsed_user_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<UserAddon>> {
        Ok(self
            .state
            .read()
            .await
            .user_addons
            .values()
            .filter(|a| a.status == AddonStatus::Active && a.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageRepository for InMemoryStore {
    async fn list_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>> {
        let state = self.state.read().await;
        let mut limits: Vec<_> = state
            .usage_limits
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        limits.sort_by_key(|l| l.limit_type.as_str());
        Ok(limits)
    }

    async fn find_usage_limit(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
    ) -> BillingResult<Option<UsageLimit>> {
        Ok(self
            .state
            .read()
            .await
            .usage_limits
            .values()
            .find(|l| l.user_id == user_id && l.limit_type == limit_type)
            .cloned())
    }

    async fn replace_usage_limits(
        &self,
        user_id: Uuid,
        limits: Vec<UsageLimit>,
    ) -> BillingResult<Vec<UsageLimit>> {
        let mut state = self.state.write().await;
        state.usage_limits.retain(|_, l| l.user_id != user_id);
        for limit in &limits {
            state.usage_limits.insert(limit.id, limit.clone());
        }
        Ok(limits)
    }

    async fn increment_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        let mut state = self.state.write().await;
        let limit = state
            .usage_limits
            .get_mut(&id)
            .ok_or_else(|| missing("Usage limit", id))?;
        limit.current_value += 1;
        Ok(limit.clone())
    }

    async fn decrement_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        let mut state = self.state.write().await;
        let limit = state
            .usage_limits
            .get_mut(&id)
            .ok_or_else(|| missing("Usage limit", id))?;
        limit.current_value = (limit.current_value - 1).max(0);
        Ok(limit.clone())
    }

    async fn reset_usage_counters(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<Vec<UsageLimit>> {
        let mut state = self.state.write().await;
        let mut reset = Vec::new();
        for limit in state
            .usage_limits
            .values_mut()
            .filter(|l| l.user_id == user_id)
        {
            limit.current_value = 0;
            limit.period_start = period_start;
            limit.period_end = period_end;
            limit.last_reset_at = reset_at;
            reset.push(limit.clone());
        }
        reset.sort_by_key(|l| l.limit_type.as_str());
        Ok(reset)
    }

    async fn reset_usage_limit(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<UsageLimit> {
        let mut state = self.state.write().await;
        let limit = state
            .usage_limits
            .get_mut(&id)
            .ok_or_else(|| missing("Usage limit", id))?;
        limit.current_value = 0;
        limit.period_start = period_start;
        limit.period_end = period_end;
        limit.last_reset_at = reset_at;
        Ok(limit.clone())
    }

    async fn list_lapsed_usage_limits(&self, now: OffsetDateTime) -> BillingResult<Vec<UsageLimit>> {
        Ok(self
            .state
            .read()
            .await
            .usage_limits
            .values()
            .filter(|l| l.period_end < now)
            .cloned()
            .collect())
    }

    async fn insert_usage_event(&self, event: UsageEvent) -> BillingResult<UsageEvent> {
        self.state.write().await.usage_events.push(event.clone());
        Ok(event)
    }

    async fn list_usage_events(&self, user_id: Uuid, limit: usize) -> BillingResult<Vec<UsageEvent>> {
        let state = self.state.read().await;
        // Appended in order, so newest are at the back
        Ok(state
            .usage_events
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn is_current_status(status: SubscriptionStatus) -> bool {
    matches!(
        status,
        SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
    )
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn insert_subscription(&self, subscription: Subscription) -> BillingResult<Subscription> {
        let mut state = self.state.write().await;
        if !state.tiers.contains_key(&subscription.tier_id) {
            return Err(BillingError::Database(format!(
                "foreign key violation: tier {} does not exist",
                subscription.tier_id
            )));
        }
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn find_current_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && is_current_status(s.status))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> BillingResult<Subscription> {
        let mut state = self.state.write().await;
        let stored = state
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or_else(|| missing("Subscription", subscription.id))?;
        *stored = subscription.clone();
        Ok(stored.clone())
    }

    async fn insert_credit(&self, credit: ProrationCredit) -> BillingResult<ProrationCredit> {
        self.state.write().await.credits.push(credit.clone());
        Ok(credit)
    }

    async fn list_credits(&self, user_id: Uuid) -> BillingResult<Vec<ProrationCredit>> {
        let state = self.state.read().await;
        let mut credits: Vec<_> = state
            .credits
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        credits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(credits)
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn list_products(&self) -> BillingResult<Vec<Product>> {
        Ok(self.state.read().await.products.clone())
    }

    async fn get_product_by_slug(&self, slug: &str) -> BillingResult<Option<Product>> {
        Ok(self
            .state
            .read()
            .await
            .products
            .iter()
            .find(|p| p.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl InvariantRepository for InMemoryStore {
    async fn usage_over_limit(&self) -> BillingResult<Vec<UsageLimit>> {
        Ok(self
            .state
            .read()
            .await
            .usage_limits
            .values()
            .filter(|l| !l.is_unlimited() && l.current_value > l.limit_value)
            .cloned()
            .collect())
    }

    async fn invalid_soft_caps(&self) -> BillingResult<Vec<UsageLimit>> {
        Ok(self
            .state
            .read()
            .await
            .usage_limits
            .values()
            .filter(|l| !(l.soft_cap_threshold > 0.0 && l.soft_cap_threshold <= 1.0))
            .cloned()
            .collect())
    }

    async fn duplicate_active_addons(&self) -> BillingResult<Vec<(Uuid, Uuid, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<(Uuid, Uuid), i64> = HashMap::new();
        for addon in state
            .user_addons
            .values()
            .filter(|a| a.status == AddonStatus::Active)
        {
            let stackable = state
                .addon_products
                .get(&addon.addon_id)
                .is_some_and(|p| p.is_stackable);
            if !stackable {
                *counts.entry((addon.user_id, addon.addon_id)).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((user_id, addon_id), count)| (user_id, addon_id, count))
            .collect())
    }

    async fn negative_credits(&self) -> BillingResult<Vec<ProrationCredit>> {
        Ok(self
            .state
            .read()
            .await
            .credits
            .iter()
            .filter(|c| c.credit_amount < 0)
            .cloned()
            .collect())
    }

    async fn users_with_multiple_subscriptions(&self) -> BillingResult<Vec<(Uuid, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for sub in state
            .subscriptions
            .values()
            .filter(|s| is_current_status(s.status))
        {
            *counts.entry(sub.user_id).or_default() += 1;
        }
        Ok(counts.into_iter().filter(|(_, c)| *c > 1).collect())
    }
}
