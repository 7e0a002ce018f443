//! Add-on purchases
//!
//! Capacity packs bought on top of a tier. A purchase grants
//! `addon.quantity * quantity` units of the matching resource; recurring packs
//! lapse after the add-on term unless auto-renewed by the expiry job.

use std::collections::HashMap;
use std::sync::Arc;

use findawise_shared::{AddonStatus, BillingCycle, BillingType, LimitType};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::catalog::CatalogService;
use crate::config::BillingConfig;
use crate::entitlement;
use crate::error::{BillingError, BillingResult};
use crate::models::{AddonProduct, UserAddon, UserAddonWithProduct};
use crate::store::BillingStore;
use crate::subscriptions::resolve_user_tier;

/// Price quote for an add-on purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonPricing {
    pub addon_id: Uuid,
    pub quantity: u32,
    pub billing_cycle: BillingCycle,
    /// Cents before discount; twelve months' worth for yearly billing
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
    pub savings: i64,
}

/// Urgency of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

impl RecommendationPriority {
    /// `None` below 80% utilization
    pub fn from_percentage(percentage: f64) -> Option<Self> {
        if percentage >= 95.0 {
            Some(Self::High)
        } else if percentage >= 90.0 {
            Some(Self::Medium)
        } else if percentage >= 80.0 {
            Some(Self::Low)
        } else {
            None
        }
    }
}

/// An add-on suggested because a limit is running out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonRecommendation {
    pub addon: AddonProduct,
    pub limit_type: LimitType,
    pub percentage: f64,
    pub reason: String,
    pub priority: RecommendationPriority,
}

/// Result of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonExpirySummary {
    pub renewed: usize,
    pub expired: usize,
}

/// Quote `quantity` units at `unit_price`.
///
/// Yearly billing charges twelve months less `discount_percent`, rounded half up.
pub fn quote(unit_price: i64, quantity: u32, cycle: BillingCycle, discount_percent: i64) -> (i64, i64, i64) {
    let monthly = unit_price * i64::from(quantity);
    match cycle {
        BillingCycle::Monthly => (monthly, 0, monthly),
        BillingCycle::Yearly => {
            let annual = monthly * 12;
            let discount = (annual * discount_percent + 50) / 100;
            (annual, discount, annual - discount)
        }
    }
}

/// The user's purchases joined with their products, newest first
pub(crate) async fn load_user_addons(
    store: &dyn BillingStore,
    user_id: Uuid,
) -> BillingResult<Vec<UserAddonWithProduct>> {
    let purchases = store.list_user_addons(user_id).await?;
    let mut products: HashMap<Uuid, AddonProduct> = HashMap::new();
    let mut joined = Vec::with_capacity(purchases.len());

    for user_addon in purchases {
        let addon = match products.get(&user_addon.addon_id) {
            Some(addon) => addon.clone(),
            None => match store.get_addon_product(user_addon.addon_id).await? {
                Some(addon) => {
                    products.insert(addon.id, addon.clone());
                    addon
                }
                None => {
                    tracing::warn!(
                        user_addon_id = %user_addon.id,
                        addon_id = %user_addon.addon_id,
                        "User add-on references a missing product"
                    );
                    continue;
                }
            },
        };
        joined.push(UserAddonWithProduct { user_addon, addon });
    }

    Ok(joined)
}

/// Add-on purchase, cancellation and recommendations
#[derive(Clone)]
pub struct AddonService {
    store: Arc<dyn BillingStore>,
    catalog: CatalogService,
    config: BillingConfig,
}

impl AddonService {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        let catalog = CatalogService::new(store.clone());
        Self {
            store,
            catalog,
            config,
        }
    }

    /// Buy `quantity` units of an add-on
    pub async fn purchase_addon(
        &self,
        user_id: Uuid,
        addon_id: Uuid,
        quantity: u32,
        auto_renew: bool,
    ) -> BillingResult<UserAddonWithProduct> {
        let addon = self
            .store
            .get_addon_product(addon_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| BillingError::NotFound(format!("Add-on {} not found", addon_id)))?;

        if quantity == 0 {
            return Err(BillingError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        if !addon.is_stackable
            && self
                .store
                .find_active_user_addon(user_id, addon_id)
                .await?
                .is_some()
        {
            return Err(BillingError::AlreadyActive(format!(
                "Add-on '{}' is already active for this account",
                addon.slug
            )));
        }

        if let Some(max) = addon.max_quantity {
            if quantity > max {
                return Err(BillingError::QuantityExceeded {
                    requested: quantity,
                    max,
                });
            }
        }

        let tier = resolve_user_tier(self.store.as_ref(), user_id).await?;
        if !entitlement::tier_grants(tier.slug, addon.minimum_tier) {
            return Err(BillingError::InvalidTier(format!(
                "Add-on '{}' requires the {} tier or higher",
                addon.slug, addon.minimum_tier
            )));
        }

        let now = OffsetDateTime::now_utc();
        let expires_at = match addon.billing_type {
            BillingType::Recurring => Some(now + Duration::days(self.config.addon_term_days)),
            BillingType::OneTime => None,
        };

        let user_addon = self
            .store
            .insert_user_addon(UserAddon {
                id: Uuid::new_v4(),
                user_id,
                addon_id,
                quantity,
                status: AddonStatus::Active,
                purchased_at: now,
                expires_at,
                auto_renew,
                usage_current: 0,
                usage_limit: addon.quantity * i64::from(quantity),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            addon = %addon.slug,
            quantity = quantity,
            usage_limit = user_addon.usage_limit,
            "Purchased add-on"
        );

        Ok(UserAddonWithProduct { user_addon, addon })
    }

    /// Cancel a purchase. Consumed usage is kept.
    pub async fn cancel_addon(&self, user_addon_id: Uuid) -> BillingResult<UserAddon> {
        let mut user_addon = self
            .store
            .get_user_addon(user_addon_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("User add-on {} not found", user_addon_id))
            })?;

        user_addon.status = AddonStatus::Canceled;
        user_addon.auto_renew = false;
        let user_addon = self.store.update_user_addon(&user_addon).await?;

        tracing::info!(
            user_id = %user_addon.user_id,
            user_addon_id = %user_addon.id,
            "Canceled add-on"
        );
        Ok(user_addon)
    }

    /// Cancel only if the purchase belongs to `user_id`
    pub async fn cancel_user_addon(
        &self,
        user_id: Uuid,
        user_addon_id: Uuid,
    ) -> BillingResult<UserAddon> {
        match self.store.get_user_addon(user_addon_id).await? {
            Some(ua) if ua.user_id == user_id => self.cancel_addon(user_addon_id).await,
            _ => Err(BillingError::NotFound(format!(
                "User add-on {} not found",
                user_addon_id
            ))),
        }
    }

    pub async fn calculate_addon_pricing(
        &self,
        addon_id: Uuid,
        quantity: u32,
        billing_cycle: BillingCycle,
    ) -> BillingResult<AddonPricing> {
        let addon = self
            .store
            .get_addon_product(addon_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Add-on {} not found", addon_id)))?;

        let (subtotal, discount, total) = quote(
            addon.price,
            quantity,
            billing_cycle,
            self.config.annual_discount_percent,
        );

        Ok(AddonPricing {
            addon_id,
            quantity,
            billing_cycle,
            subtotal,
            discount,
            total,
            savings: discount,
        })
    }

    /// Cheapest matching add-on for every limit at 80% or more, most urgent first
    pub async fn get_recommended_addons(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Vec<AddonRecommendation>> {
        let now = OffsetDateTime::now_utc();
        let limits = self.store.list_usage_limits(user_id).await?;
        let owned = load_user_addons(self.store.as_ref(), user_id).await?;

        let mut recommendations = Vec::new();
        for limit in limits.iter().filter(|l| l.is_current(now) && !l.is_unlimited()) {
            let capacity = entitlement::addon_capacity_for(limit.limit_type, &owned, now);
            let percentage = entitlement::usage_percentage(limit, capacity);
            let Some(priority) = RecommendationPriority::from_percentage(percentage) else {
                continue;
            };
            let Some(addon) = self
                .catalog
                .cheapest_addon_for(limit.limit_type.addon_type(), &owned, now)
                .await?
            else {
                continue;
            };

            recommendations.push(AddonRecommendation {
                addon,
                limit_type: limit.limit_type,
                percentage,
                reason: format!(
                    "You have used {:.0}% of your {} limit",
                    percentage,
                    limit.limit_type.display_name()
                ),
                priority,
            });
        }

        recommendations.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.percentage.total_cmp(&a.percentage))
        });
        Ok(recommendations)
    }

    /// Every purchase, newest first
    pub async fn list_user_addons(&self, user_id: Uuid) -> BillingResult<Vec<UserAddonWithProduct>> {
        load_user_addons(self.store.as_ref(), user_id).await
    }

    /// Purchases that are active and unexpired at `now`
    pub async fn list_active_user_addons(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<UserAddonWithProduct>> {
        Ok(load_user_addons(self.store.as_ref(), user_id)
            .await?
            .into_iter()
            .filter(|ua| ua.user_addon.is_live(now))
            .collect())
    }

    /// Renew auto-renewing purchases past their expiry and expire the rest
    pub async fn expire_addons(&self, now: OffsetDateTime) -> BillingResult<AddonExpirySummary> {
        let term = Duration::days(self.config.addon_term_days);
        let mut summary = AddonExpirySummary::default();

        for mut user_addon in self.store.list_lapsed_user_addons(now).await? {
            if user_addon.auto_renew {
                let mut expires_at = user_addon.expires_at.unwrap_or(now);
                while expires_at <= now {
                    expires_at += term;
                }
                user_addon.expires_at = Some(expires_at);
                user_addon.usage_current = 0;
                summary.renewed += 1;
            } else {
                user_addon.status = AddonStatus::Expired;
                summary.expired += 1;
            }
            self.store.update_user_addon(&user_addon).await?;

            tracing::debug!(
                user_id = %user_addon.user_id,
                user_addon_id = %user_addon.id,
                status = %user_addon.status,
                "Processed lapsed add-on"
            );
        }

        if summary.renewed + summary.expired > 0 {
            tracing::info!(
                renewed = summary.renewed,
                expired = summary.expired,
                "Processed lapsed add-ons"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_tier_id;
    use crate::store::{AddonRepository, InMemoryStore, UsageRepository};
    use crate::subscriptions::SubscriptionService;
    use crate::usage::UsageLedger;
    use findawise_shared::{AddonType, TierSlug};

    struct Fixture {
        addons: AddonService,
        subscriptions: SubscriptionService,
        store: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::with_default_catalog());
        let config = BillingConfig::default();
        let ledger = UsageLedger::new(store.clone(), config.clone());
        Fixture {
            addons: AddonService::new(store.clone(), config.clone()),
            subscriptions: SubscriptionService::new(store.clone(), config, ledger),
            store,
        }
    }

    async fn product(store: &InMemoryStore, slug: &str) -> AddonProduct {
        store
            .list_addon_products()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.slug == slug)
            .unwrap()
    }

    async fn subscribe(fx: &Fixture, user_id: Uuid, tier: TierSlug) {
        fx.subscriptions
            .create_subscription(user_id, default_tier_id(tier), BillingCycle::Monthly)
            .await
            .unwrap();
    }

    #[test]
    fn test_quote_monthly_and_yearly() {
        assert_eq!(quote(500, 2, BillingCycle::Monthly, 20), (1000, 0, 1000));
        assert_eq!(quote(500, 2, BillingCycle::Yearly, 20), (12000, 2400, 9600));
        // 12 * 333 = 3996, 15% = 599.4
        assert_eq!(quote(333, 1, BillingCycle::Yearly, 15), (3996, 599, 3397));
    }

    #[test]
    fn test_priority_thresholds() {
        assert_eq!(RecommendationPriority::from_percentage(96.0), Some(RecommendationPriority::High));
        assert_eq!(RecommendationPriority::from_percentage(90.0), Some(RecommendationPriority::Medium));
        assert_eq!(RecommendationPriority::from_percentage(80.0), Some(RecommendationPriority::Low));
        assert_eq!(RecommendationPriority::from_percentage(79.9), None);
    }

    #[tokio::test]
    async fn test_purchase_recurring_sets_expiry_and_capacity() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        subscribe(&fx, user_id, TierSlug::Starter).await;
        let pack = product(&fx.store, "workflow-pack-10").await;

        let purchased = fx.addons.purchase_addon(user_id, pack.id, 3, true).await.unwrap();
        assert_eq!(purchased.user_addon.usage_limit, 30);
        assert_eq!(purchased.user_addon.usage_current, 0);
        assert!(purchased.user_addon.auto_renew);

        let expires = purchased.user_addon.expires_at.unwrap();
        let term = expires - purchased.user_addon.purchased_at;
        assert_eq!(term.whole_days(), 30);
    }

    #[tokio::test]
    async fn test_one_time_addon_never_expires() {
        let fx = fixture();
        let pack = product(&fx.store, "asset-pack-100").await;
        let purchased = fx
            .addons
            .purchase_addon(Uuid::new_v4(), pack.id, 1, false)
            .await
            .unwrap();
        assert!(purchased.user_addon.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_purchase_rejections() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let missing = fx.addons.purchase_addon(user_id, Uuid::new_v4(), 1, false).await;
        assert!(matches!(missing, Err(BillingError::NotFound(_))));

        // Free users cannot buy starter packs
        let pack = product(&fx.store, "agent-pack-5").await;
        let below_tier = fx.addons.purchase_addon(user_id, pack.id, 1, false).await;
        assert!(matches!(below_tier, Err(BillingError::InvalidTier(_))));

        subscribe(&fx, user_id, TierSlug::Starter).await;
        let too_many = fx.addons.purchase_addon(user_id, pack.id, 6, false).await;
        assert!(matches!(
            too_many,
            Err(BillingError::QuantityExceeded { requested: 6, max: 5 })
        ));

        let zero = fx.addons.purchase_addon(user_id, pack.id, 0, false).await;
        assert!(matches!(zero, Err(BillingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_inactive_addon_is_not_found() {
        let fx = fixture();
        let mut pack = product(&fx.store, "asset-pack-100").await;
        pack.is_active = false;
        fx.store.upsert_addon_product(pack.clone()).await.unwrap();

        let result = fx.addons.purchase_addon(Uuid::new_v4(), pack.id, 1, false).await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_keeps_usage() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        subscribe(&fx, user_id, TierSlug::Starter).await;
        let pack = product(&fx.store, "tool-pack-5000").await;
        let purchased = fx.addons.purchase_addon(user_id, pack.id, 1, true).await.unwrap();
        fx.store
            .consume_user_addon_unit(purchased.user_addon.id)
            .await
            .unwrap();

        let canceled = fx.addons.cancel_addon(purchased.user_addon.id).await.unwrap();
        assert_eq!(canceled.status, AddonStatus::Canceled);
        assert!(!canceled.auto_renew);
        assert_eq!(canceled.usage_current, 1);

        let active = fx
            .addons
            .list_active_user_addons(user_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(active.is_empty());
        assert_eq!(fx.addons.list_user_addons(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_requires_ownership() {
        let fx = fixture();
        let pack = product(&fx.store, "asset-pack-100").await;
        let purchased = fx
            .addons
            .purchase_addon(Uuid::new_v4(), pack.id, 1, false)
            .await
            .unwrap();

        let result = fx
            .addons
            .cancel_user_addon(Uuid::new_v4(), purchased.user_addon.id)
            .await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pricing_uses_catalog_price() {
        let fx = fixture();
        let pack = product(&fx.store, "asset-pack-100").await;
        let pricing = fx
            .addons
            .calculate_addon_pricing(pack.id, 2, BillingCycle::Yearly)
            .await
            .unwrap();
        assert_eq!(pricing.subtotal, 12_000);
        assert_eq!(pricing.discount, 2_400);
        assert_eq!(pricing.total, 9_600);
        assert_eq!(pricing.savings, pricing.discount);
    }

    #[tokio::test]
    async fn test_recommendations_follow_utilization() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        subscribe(&fx, user_id, TierSlug::Starter).await;
        let ledger = UsageLedger::new(fx.store.clone(), BillingConfig::default());

        // Starter: 3 agents, 5 workflows
        for _ in 0..3 {
            ledger
                .increment_usage(user_id, LimitType::Agents, "agent", None, None)
                .await
                .unwrap();
        }
        for _ in 0..4 {
            ledger
                .increment_usage(user_id, LimitType::WorkflowDeployments, "workflow", None, None)
                .await
                .unwrap();
        }

        let recs = fx.addons.get_recommended_addons(user_id).await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].limit_type, LimitType::Agents);
        assert_eq!(recs[0].priority, RecommendationPriority::High);
        assert_eq!(recs[0].addon.addon_type, AddonType::AgentCapacity);
        assert_eq!(recs[1].limit_type, LimitType::WorkflowDeployments);
        assert_eq!(recs[1].priority, RecommendationPriority::Low);
    }

    #[tokio::test]
    async fn test_recommendations_skip_held_non_stackable() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        subscribe(&fx, user_id, TierSlug::Starter).await;
        let row = fx
            .store
            .find_usage_limit(user_id, LimitType::StorageGb)
            .await
            .unwrap()
            .unwrap();

        // Starter: 10 GB, so 9 GB is 90%
        for _ in 0..9 {
            fx.store.increment_usage_counter(row.id).await.unwrap();
        }
        let recs = fx.addons.get_recommended_addons(user_id).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].addon.slug, "extra-storage-50");

        // Holding the pack lifts capacity to 60 GB; push usage back past 95%
        let storage = product(&fx.store, "extra-storage-50").await;
        fx.addons
            .purchase_addon(user_id, storage.id, 1, false)
            .await
            .unwrap();
        for _ in 0..49 {
            fx.store.increment_usage_counter(row.id).await.unwrap();
        }
        let recs = fx.addons.get_recommended_addons(user_id).await.unwrap();
        assert!(recs.iter().all(|r| r.limit_type != LimitType::StorageGb));
    }

    #[tokio::test]
    async fn test_expiry_renews_or_expires() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        subscribe(&fx, user_id, TierSlug::Starter).await;
        let tools = product(&fx.store, "tool-pack-5000").await;
        let api = product(&fx.store, "api-pack-50000").await;

        let renewing = fx.addons.purchase_addon(user_id, tools.id, 1, true).await.unwrap();
        let lapsing = fx.addons.purchase_addon(user_id, api.id, 1, false).await.unwrap();
        fx.store
            .consume_user_addon_unit(renewing.user_addon.id)
            .await
            .unwrap();

        let later = OffsetDateTime::now_utc() + Duration::days(45);
        let summary = fx.addons.expire_addons(later).await.unwrap();
        assert_eq!(summary, AddonExpirySummary { renewed: 1, expired: 1 });

        let renewed = fx.store.get_user_addon(renewing.user_addon.id).await.unwrap().unwrap();
        assert_eq!(renewed.status, AddonStatus::Active);
        assert_eq!(renewed.usage_current, 0);
        assert!(renewed.expires_at.unwrap() > later);

        let expired = fx.store.get_user_addon(lapsing.user_addon.id).await.unwrap().unwrap();
        assert_eq!(expired.status, AddonStatus::Expired);
    }
}
