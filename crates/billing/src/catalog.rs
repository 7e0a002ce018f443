//! Tier and add-on catalog
//!
//! Reference data read by every other service. The default catalog seeds the
//! in-memory store and documents the shipped price list; production rows come
//! from the administrative seeding process.

use std::sync::Arc;

use findawise_shared::{AddonType, BillingType, LimitType, TierSlug, UNLIMITED};
use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    AddonProduct, FeatureMap, FeatureValue, PricingTier, Product, UserAddonWithProduct,
};
use crate::store::BillingStore;

/// Read access to tiers and add-on products
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn BillingStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Active tiers ordered by sort order
    pub async fn list_tiers(&self) -> BillingResult<Vec<PricingTier>> {
        let mut tiers: Vec<_> = self
            .store
            .list_tiers()
            .await?
            .into_iter()
            .filter(|t| t.is_active)
            .collect();
        tiers.sort_by_key(|t| t.sort_order);
        Ok(tiers)
    }

    pub async fn get_tier(&self, tier_id: Uuid) -> BillingResult<PricingTier> {
        self.store
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", tier_id)))
    }

    pub async fn get_tier_by_slug(&self, slug: TierSlug) -> BillingResult<PricingTier> {
        self.store
            .get_tier_by_slug(slug)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier '{}' not found", slug)))
    }

    /// Active add-ons ordered by price
    pub async fn list_addons(&self) -> BillingResult<Vec<AddonProduct>> {
        let mut addons: Vec<_> = self
            .store
            .list_addon_products()
            .await?
            .into_iter()
            .filter(|a| a.is_active)
            .collect();
        addons.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.slug.cmp(&b.slug)));
        Ok(addons)
    }

    pub async fn get_addon(&self, addon_id: Uuid) -> BillingResult<AddonProduct> {
        self.store
            .get_addon_product(addon_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Add-on {} not found", addon_id)))
    }

    /// Cheapest active add-on of a type the user can still buy.
    ///
    /// Non-stackable add-ons the user already holds live are skipped.
    pub async fn cheapest_addon_for(
        &self,
        addon_type: AddonType,
        owned: &[UserAddonWithProduct],
        now: OffsetDateTime,
    ) -> BillingResult<Option<AddonProduct>> {
        Ok(self.list_addons().await?.into_iter().find(|a| {
            a.addon_type == addon_type
                && (a.is_stackable
                    || !owned
                        .iter()
                        .any(|ua| ua.addon.id == a.id && ua.user_addon.is_live(now)))
        }))
    }

    /// Write the default tiers and add-ons into an empty catalog.
    ///
    /// A store that already has tiers is left untouched. Returns whether
    /// anything was written.
    pub async fn seed_defaults(&self) -> BillingResult<bool> {
        if !self.store.list_tiers().await?.is_empty() {
            return Ok(false);
        }

        let tiers = default_tiers();
        let addons = default_addons();
        let (tier_count, addon_count) = (tiers.len(), addons.len());
        for tier in tiers {
            self.store.upsert_tier(tier).await?;
        }
        for addon in addons {
            self.store.upsert_addon_product(addon).await?;
        }

        tracing::info!(
            tiers = tier_count,
            addons = addon_count,
            "Seeded default catalog"
        );
        Ok(true)
    }
}

// ============================================================================
// Default catalog
// ============================================================================

const TIER_ID_BASE: u128 = 0x6f1d_0000_0000_4000_8000_0000_0000_0000;
const ADDON_ID_BASE: u128 = 0x6f1d_0001_0000_4000_8000_0000_0000_0000;
const PRODUCT_ID_BASE: u128 = 0x6f1d_0002_0000_4000_8000_0000_0000_0000;

/// Stable id of a default tier
pub fn default_tier_id(slug: TierSlug) -> Uuid {
    Uuid::from_u128(TIER_ID_BASE + slug.rank() as u128 + 1)
}

fn features(limits: [i64; 7], flags: &[(&str, bool)]) -> FeatureMap {
    let mut map: FeatureMap = LimitType::ALL
        .iter()
        .zip(limits)
        .map(|(t, v)| (t.as_str().to_string(), FeatureValue::Limit(v)))
        .collect();
    for (key, enabled) in flags {
        map.insert((*key).to_string(), FeatureValue::Flag(*enabled));
    }
    map
}

/// Free, Starter, Professional and Enterprise.
///
/// Limits follow [`LimitType::ALL`] order: workflows, agents, asset downloads,
/// tool uses, API calls, storage GB, bandwidth GB.
pub fn default_tiers() -> Vec<PricingTier> {
    let tier = |slug: TierSlug, name: &str, monthly: i64, yearly: i64, features: FeatureMap| {
        PricingTier {
            id: default_tier_id(slug),
            slug,
            name: name.to_string(),
            price_monthly: monthly,
            price_yearly: yearly,
            features,
            is_active: true,
            sort_order: slug.rank() as i32,
        }
    };

    vec![
        tier(
            TierSlug::Free,
            "Free",
            0,
            0,
            features(
                [1, 1, 5, 100, 1_000, 1, 5],
                &[
                    ("api_access", false),
                    ("advanced_analytics", false),
                    ("priority_support", false),
                    ("custom_branding", false),
                ],
            ),
        ),
        tier(
            TierSlug::Starter,
            "Starter",
            1_900,
            19_000,
            features(
                [5, 3, 50, 1_000, 10_000, 10, 50],
                &[
                    ("api_access", true),
                    ("advanced_analytics", false),
                    ("priority_support", false),
                    ("custom_branding", false),
                ],
            ),
        ),
        tier(
            TierSlug::Professional,
            "Professional",
            4_900,
            49_000,
            features(
                [25, 10, 500, 10_000, 100_000, 100, 500],
                &[
                    ("api_access", true),
                    ("advanced_analytics", true),
                    ("priority_support", true),
                    ("custom_branding", false),
                ],
            ),
        ),
        tier(
            TierSlug::Enterprise,
            "Enterprise",
            19_900,
            199_000,
            features(
                [UNLIMITED; 7],
                &[
                    ("api_access", true),
                    ("advanced_analytics", true),
                    ("priority_support", true),
                    ("custom_branding", true),
                ],
            ),
        ),
    ]
}

/// Capacity packs, one or more per add-on type
pub fn default_addons() -> Vec<AddonProduct> {
    struct Row(
        &'static str,
        &'static str,
        AddonType,
        i64,
        i64,
        BillingType,
        TierSlug,
        bool,
        Option<u32>,
    );

    let rows = [
        Row("workflow-pack-10", "10 Extra Workflow Deployments", AddonType::WorkflowCapacity, 10, 900, BillingType::Recurring, TierSlug::Starter, true, Some(10)),
        Row("agent-pack-5", "5 Extra Agents", AddonType::AgentCapacity, 5, 1_500, BillingType::Recurring, TierSlug::Starter, true, Some(5)),
        Row("asset-pack-100", "100 Asset Downloads", AddonType::AssetCapacity, 100, 500, BillingType::OneTime, TierSlug::Free, true, None),
        Row("tool-pack-5000", "5,000 Tool Uses", AddonType::ToolCapacity, 5_000, 700, BillingType::Recurring, TierSlug::Starter, true, Some(20)),
        Row("api-pack-50000", "50,000 API Calls", AddonType::ApiCapacity, 50_000, 1_200, BillingType::Recurring, TierSlug::Starter, true, Some(20)),
        Row("extra-storage-50", "Extra Storage (50 GB)", AddonType::Storage, 50, 1_000, BillingType::Recurring, TierSlug::Starter, false, Some(4)),
        Row("bandwidth-boost-250", "Bandwidth Boost (250 GB)", AddonType::Bandwidth, 250, 800, BillingType::Recurring, TierSlug::Professional, false, Some(2)),
    ];

    rows.into_iter()
        .enumerate()
        .map(
            |(i, Row(slug, name, addon_type, quantity, price, billing_type, minimum_tier, is_stackable, max_quantity))| {
                AddonProduct {
                    id: Uuid::from_u128(ADDON_ID_BASE + i as u128 + 1),
                    slug: slug.to_string(),
                    name: name.to_string(),
                    addon_type,
                    quantity,
                    price,
                    billing_type,
                    minimum_tier,
                    is_stackable,
                    max_quantity,
                    is_active: true,
                }
            },
        )
        .collect()
}

/// Small marketplace listing used in demo mode
pub fn default_products() -> Vec<Product> {
    let product = |n: u128,
                   slug: &str,
                   name: &str,
                   category: &str,
                   price_cents: i64,
                   required_tier: TierSlug,
                   tags: &[&str],
                   rating: f64,
                   downloads: i64,
                   is_featured: bool,
                   created_at| Product {
        id: Uuid::from_u128(PRODUCT_ID_BASE + n),
        slug: slug.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        price_cents,
        required_tier,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        rating,
        downloads,
        is_featured,
        created_at,
    };

    vec![
        product(1, "lead-capture-workflow", "Lead Capture Workflow", "workflows", 0, TierSlug::Free,
            &["crm", "sales"], 4.2, 1_840, false, datetime!(2025-01-10 09:00 UTC)),
        product(2, "invoice-automation", "Invoice Automation", "workflows", 2_900, TierSlug::Starter,
            &["finance", "pdf"], 4.6, 960, true, datetime!(2025-02-14 09:00 UTC)),
        product(3, "support-triage-agent", "Support Triage Agent", "agents", 4_900, TierSlug::Professional,
            &["support", "ai"], 4.8, 2_310, true, datetime!(2025-03-02 09:00 UTC)),
        product(4, "social-scheduler", "Social Media Scheduler", "workflows", 1_900, TierSlug::Starter,
            &["marketing", "social"], 3.9, 3_120, false, datetime!(2025-03-20 09:00 UTC)),
        product(5, "research-agent", "Research Agent", "agents", 9_900, TierSlug::Enterprise,
            &["ai", "research"], 4.9, 410, false, datetime!(2025-04-05 09:00 UTC)),
        product(6, "onboarding-email-kit", "Onboarding Email Kit", "templates", 0, TierSlug::Free,
            &["marketing", "email"], 4.0, 5_270, false, datetime!(2025-04-18 09:00 UTC)),
    ]
}
