//! PostgreSQL store

use std::str::FromStr;

use async_trait::async_trait;
use findawise_shared::{LimitType, TierSlug};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AddonRepository, InvariantRepository, ProductRepository, SubscriptionRepository,
    TierRepository, UsageRepository,
};
use crate::error::BillingResult;
use crate::models::{
    AddonProduct, FeatureMap, PricingTier, Product, ProrationCredit, Subscription, UsageEvent,
    UsageLimit, UserAddon,
};

const TIER_COLUMNS: &str =
    "id, slug, name, price_monthly, price_yearly, features, is_active, sort_order";

const ADDON_COLUMNS: &str = "id, slug, name, addon_type, quantity, price, billing_type, \
     minimum_tier, is_stackable, max_quantity, is_active";

const USER_ADDON_COLUMNS: &str = "id, user_id, addon_id, quantity, status, purchased_at, \
     expires_at, auto_renew, usage_current, usage_limit";

const USAGE_LIMIT_COLUMNS: &str = "id, user_id, limit_type, limit_value, current_value, \
     soft_cap_threshold, period_start, period_end, last_reset_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, tier_id, status, billing_cycle, \
     current_period_start, current_period_end, cancel_at_period_end, created_at, updated_at";

const CREDIT_COLUMNS: &str =
    "id, user_id, subscription_id, credit_amount, reason, is_applied, expires_at, created_at";

const PRODUCT_COLUMNS: &str = "id, slug, name, category, price_cents, required_tier, tags, \
     rating, downloads, is_featured, created_at";

/// Postgres-backed [`BillingStore`](super::BillingStore)
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Decode a text column into one of the shared enums
fn enum_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = findawise_shared::ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn tier_from_row(row: &PgRow) -> Result<PricingTier, sqlx::Error> {
    let features: Json<FeatureMap> = row.try_get("features")?;
    Ok(PricingTier {
        id: row.try_get("id")?,
        slug: enum_column(row, "slug")?,
        name: row.try_get("name")?,
        price_monthly: row.try_get("price_monthly")?,
        price_yearly: row.try_get("price_yearly")?,
        features: features.0,
        is_active: row.try_get("is_active")?,
        sort_order: row.try_get("sort_order")?,
    })
}

fn addon_from_row(row: &PgRow) -> Result<AddonProduct, sqlx::Error> {
    let max_quantity: Option<i32> = row.try_get("max_quantity")?;
    Ok(AddonProduct {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        addon_type: enum_column(row, "addon_type")?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        billing_type: enum_column(row, "billing_type")?,
        minimum_tier: enum_column(row, "minimum_tier")?,
        is_stackable: row.try_get("is_stackable")?,
        max_quantity: max_quantity.map(|q| q.max(0) as u32),
        is_active: row.try_get("is_active")?,
    })
}

fn user_addon_from_row(row: &PgRow) -> Result<UserAddon, sqlx::Error> {
    let quantity: i32 = row.try_get("quantity")?;
    Ok(UserAddon {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        addon_id: row.try_get("addon_id")?,
        quantity: quantity.max(0) as u32,
        status: enum_column(row, "status")?,
        purchased_at: row.try_get("purchased_at")?,
        expires_at: row.try_get("expires_at")?,
        auto_renew: row.try_get("auto_renew")?,
        usage_current: row.try_get("usage_current")?,
        usage_limit: row.try_get("usage_limit")?,
    })
}

fn usage_limit_from_row(row: &PgRow) -> Result<UsageLimit, sqlx::Error> {
    Ok(UsageLimit {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        limit_type: enum_column(row, "limit_type")?,
        limit_value: row.try_get("limit_value")?,
        current_value: row.try_get("current_value")?,
        soft_cap_threshold: row.try_get("soft_cap_threshold")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        last_reset_at: row.try_get("last_reset_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, sqlx::Error> {
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tier_id: row.try_get("tier_id")?,
        status: enum_column(row, "status")?,
        billing_cycle: enum_column(row, "billing_cycle")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn credit_from_row(row: &PgRow) -> Result<ProrationCredit, sqlx::Error> {
    Ok(ProrationCredit {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        subscription_id: row.try_get("subscription_id")?,
        credit_amount: row.try_get("credit_amount")?,
        reason: row.try_get("reason")?,
        is_applied: row.try_get("is_applied")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<UsageEvent, sqlx::Error> {
    Ok(UsageEvent {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        event_type: enum_column(row, "event_type")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        price_cents: row.try_get("price_cents")?,
        required_tier: enum_column(row, "required_tier")?,
        tags: row.try_get("tags")?,
        rating: row.try_get("rating")?,
        downloads: row.try_get("downloads")?,
        is_featured: row.try_get("is_featured")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl TierRepository for PgStore {
    async fn list_tiers(&self) -> BillingResult<Vec<PricingTier>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pricing_tiers ORDER BY sort_order",
            TIER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(tier_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<PricingTier>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pricing_tiers WHERE id = $1",
            TIER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(tier_from_row).transpose()?)
    }

    async fn get_tier_by_slug(&self, slug: TierSlug) -> BillingResult<Option<PricingTier>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pricing_tiers WHERE slug = $1",
            TIER_COLUMNS
        ))
        .bind(slug.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(tier_from_row).transpose()?)
    }

    async fn upsert_tier(&self, tier: PricingTier) -> BillingResult<PricingTier> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO pricing_tiers ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                name = EXCLUDED.name,
                price_monthly = EXCLUDED.price_monthly,
                price_yearly = EXCLUDED.price_yearly,
                features = EXCLUDED.features,
                is_active = EXCLUDED.is_active,
                sort_order = EXCLUDED.sort_order
            RETURNING {cols}
            "#,
            cols = TIER_COLUMNS
        ))
        .bind(tier.id)
        .bind(tier.slug.as_str())
        .bind(&tier.name)
        .bind(tier.price_monthly)
        .bind(tier.price_yearly)
        .bind(Json(&tier.features))
        .bind(tier.is_active)
        .bind(tier.sort_order)
        .fetch_one(&self.pool)
        .await?;

        Ok(tier_from_row(&row)?)
    }
}

#[async_trait]
impl AddonRepository for PgStore {
    async fn list_addon_products(&self) -> BillingResult<Vec<AddonProduct>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM addon_products ORDER BY price, slug",
            ADDON_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(addon_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_addon_product(&self, id: Uuid) -> BillingResult<Option<AddonProduct>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM addon_products WHERE id = $1",
            ADDON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(addon_from_row).transpose()?)
    }

    async fn upsert_addon_product(&self, product: AddonProduct) -> BillingResult<AddonProduct> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO addon_products ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                name = EXCLUDED.name,
                addon_type = EXCLUDED.addon_type,
                quantity = EXCLUDED.quantity,
                price = EXCLUDED.price,
                billing_type = EXCLUDED.billing_type,
                minimum_tier = EXCLUDED.minimum_tier,
                is_stackable = EXCLUDED.is_stackable,
                max_quantity = EXCLUDED.max_quantity,
                is_active = EXCLUDED.is_active
            RETURNING {cols}
            "#,
            cols = ADDON_COLUMNS
        ))
        .bind(product.id)
        .bind(&product.slug)
        .bind(&product.name)
        .bind(product.addon_type.as_str())
        .bind(product.quantity)
        .bind(product.price)
        .bind(product.billing_type.as_str())
        .bind(product.minimum_tier.as_str())
        .bind(product.is_stackable)
        .bind(product.max_quantity.map(|q| q as i32))
        .bind(product.is_active)
        .fetch_one(&self.pool)
        .await?;

        Ok(addon_from_row(&row)?)
    }

    async fn list_user_addons(&self, user_id: Uuid) -> BillingResult<Vec<UserAddon>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM user_addons WHERE user_id = $1 ORDER BY purchased_at DESC",
            USER_ADDON_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_addon_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_user_addon(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM user_addons WHERE id = $1",
            USER_ADDON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_addon_from_row).transpose()?)
    }

    async fn find_active_user_addon(
        &self,
        user_id: Uuid,
        addon_id: Uuid,
    ) -> BillingResult<Option<UserAddon>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM user_addons
             WHERE user_id = $1 AND addon_id = $2 AND status = 'active'
             LIMIT 1",
            USER_ADDON_COLUMNS
        ))
        .bind(user_id)
        .bind(addon_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_addon_from_row).transpose()?)
    }

    async fn insert_user_addon(&self, addon: UserAddon) -> BillingResult<UserAddon> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO user_addons ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {cols}
            "#,
            cols = USER_ADDON_COLUMNS
        ))
        .bind(addon.id)
        .bind(addon.user_id)
        .bind(addon.addon_id)
        .bind(addon.quantity as i32)
        .bind(addon.status.as_str())
        .bind(addon.purchased_at)
        .bind(addon.expires_at)
        .bind(addon.auto_renew)
        .bind(addon.usage_current)
        .bind(addon.usage_limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(user_addon_from_row(&row)?)
    }

    async fn update_user_addon(&self, addon: &UserAddon) -> BillingResult<UserAddon> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE user_addons SET
                status = $2,
                auto_renew = $3,
                expires_at = $4,
                usage_current = $5
            WHERE id = $1
            RETURNING {}
            "#,
            USER_ADDON_COLUMNS
        ))
        .bind(addon.id)
        .bind(addon.status.as_str())
        .bind(addon.auto_renew)
        .bind(addon.expires_at)
        .bind(addon.usage_current)
        .fetch_one(&self.pool)
        .await?;

        Ok(user_addon_from_row(&row)?)
    }

    async fn consume_user_addon_unit(&self, id: Uuid) -> BillingResult<Option<UserAddon>> {
        // Conditional update: the capacity check and the write are one statement
        let row = sqlx::query(&format!(
            r#"
            UPDATE user_addons SET usage_current = usage_current + 1
            WHERE id = $1 AND usage_current < usage_limit
            RETURNING {}
            "#,
            USER_ADDON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_addon_from_row).transpose()?)
    }

    async fn list_lapsed_user_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<UserAddon>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM user_addons
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1",
            USER_ADDON_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_addon_from_row).collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl UsageRepository for PgStore {
    async fn list_usage_limits(&self, user_id: Uuid) -> BillingResult<Vec<UsageLimit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM usage_limits WHERE user_id = $1 ORDER BY limit_type",
            USAGE_LIMIT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(usage_limit_from_row).collect::<Result<_, _>>()?)
    }

    async fn find_usage_limit(
        &self,
        user_id: Uuid,
        limit_type: LimitType,
    ) -> BillingResult<Option<UsageLimit>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM usage_limits WHERE user_id = $1 AND limit_type = $2",
            USAGE_LIMIT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(usage_limit_from_row).transpose()?)
    }

    async fn replace_usage_limits(
        &self,
        user_id: Uuid,
        limits: Vec<UsageLimit>,
    ) -> BillingResult<Vec<UsageLimit>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM usage_limits WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = Vec::with_capacity(limits.len());
        for limit in &limits {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO usage_limits ({cols})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {cols}
                "#,
                cols = USAGE_LIMIT_COLUMNS
            ))
            .bind(limit.id)
            .bind(limit.user_id)
            .bind(limit.limit_type.as_str())
            .bind(limit.limit_value)
            .bind(limit.current_value)
            .bind(limit.soft_cap_threshold)
            .bind(limit.period_start)
            .bind(limit.period_end)
            .bind(limit.last_reset_at)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(usage_limit_from_row(&row)?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn increment_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        let row = sqlx::query(&format!(
            "UPDATE usage_limits SET current_value = current_value + 1 WHERE id = $1 RETURNING {}",
            USAGE_LIMIT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(usage_limit_from_row(&row)?)
    }

    async fn decrement_usage_counter(&self, id: Uuid) -> BillingResult<UsageLimit> {
        let row = sqlx::query(&format!(
            "UPDATE usage_limits SET current_value = GREATEST(current_value - 1, 0)
             WHERE id = $1 RETURNING {}",
            USAGE_LIMIT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(usage_limit_from_row(&row)?)
    }

    async fn reset_usage_counters(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<Vec<UsageLimit>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE usage_limits SET
                current_value = 0,
                period_start = $2,
                period_end = $3,
                last_reset_at = $4
            WHERE user_id = $1
            RETURNING {}
            "#,
            USAGE_LIMIT_COLUMNS
        ))
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .bind(reset_at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(usage_limit_from_row).collect::<Result<_, _>>()?)
    }

    async fn reset_usage_limit(
        &self,
        id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        reset_at: OffsetDateTime,
    ) -> BillingResult<UsageLimit> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE usage_limits SET
                current_value = 0,
                period_start = $2,
                period_end = $3,
                last_reset_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            USAGE_LIMIT_COLUMNS
        ))
        .bind(id)
        .bind(period_start)
        .bind(period_end)
        .bind(reset_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(usage_limit_from_row(&row)?)
    }

    async fn list_lapsed_usage_limits(&self, now: OffsetDateTime) -> BillingResult<Vec<UsageLimit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM usage_limits WHERE period_end < $1",
            USAGE_LIMIT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(usage_limit_from_row).collect::<Result<_, _>>()?)
    }

    async fn insert_usage_event(&self, event: UsageEvent) -> BillingResult<UsageEvent> {
        sqlx::query(
            r#"
            INSERT INTO usage_events
                (id, user_id, event_type, resource_type, resource_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    async fn list_usage_events(&self, user_id: Uuid, limit: usize) -> BillingResult<Vec<UsageEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_type, resource_type, resource_id, metadata, created_at
            FROM usage_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(event_from_row).collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl SubscriptionRepository for PgStore {
    async fn insert_subscription(&self, subscription: Subscription) -> BillingResult<Subscription> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {cols}
            "#,
            cols = SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.tier_id)
        .bind(subscription.status.as_str())
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription_from_row(&row)?)
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(subscription_from_row).transpose()?)
    }

    async fn find_current_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions
             WHERE user_id = $1 AND status IN ('active', 'trialing', 'past_due')
             ORDER BY created_at DESC
             LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(subscription_from_row).transpose()?)
    }

    async fn update_subscription(&self, subscription: &Subscription) -> BillingResult<Subscription> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions SET
                tier_id = $2,
                status = $3,
                billing_cycle = $4,
                current_period_start = $5,
                current_period_end = $6,
                cancel_at_period_end = $7,
                updated_at = $8
            WHERE id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription.id)
        .bind(subscription.tier_id)
        .bind(subscription.status.as_str())
        .bind(subscription.billing_cycle.as_str())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription_from_row(&row)?)
    }

    async fn insert_credit(&self, credit: ProrationCredit) -> BillingResult<ProrationCredit> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscription_proration_credits ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {cols}
            "#,
            cols = CREDIT_COLUMNS
        ))
        .bind(credit.id)
        .bind(credit.user_id)
        .bind(credit.subscription_id)
        .bind(credit.credit_amount)
        .bind(&credit.reason)
        .bind(credit.is_applied)
        .bind(credit.expires_at)
        .bind(credit.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(credit_from_row(&row)?)
    }

    async fn list_credits(&self, user_id: Uuid) -> BillingResult<Vec<ProrationCredit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_proration_credits
             WHERE user_id = $1 ORDER BY created_at DESC",
            CREDIT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(credit_from_row).collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl ProductRepository for PgStore {
    async fn list_products(&self) -> BillingResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products ORDER BY created_at DESC",
            PRODUCT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(product_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_product_by_slug(&self, slug: &str) -> BillingResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE slug = $1",
            PRODUCT_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(product_from_row).transpose()?)
    }
}

#[async_trait]
impl InvariantRepository for PgStore {
    async fn usage_over_limit(&self) -> BillingResult<Vec<UsageLimit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM usage_limits WHERE limit_value <> -1 AND current_value > limit_value",
            USAGE_LIMIT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(usage_limit_from_row).collect::<Result<_, _>>()?)
    }

    async fn invalid_soft_caps(&self) -> BillingResult<Vec<UsageLimit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM usage_limits
             WHERE soft_cap_threshold <= 0 OR soft_cap_threshold > 1",
            USAGE_LIMIT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(usage_limit_from_row).collect::<Result<_, _>>()?)
    }

    async fn duplicate_active_addons(&self) -> BillingResult<Vec<(Uuid, Uuid, i64)>> {
        let rows: Vec<(Uuid, Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT ua.user_id, ua.addon_id, COUNT(*) AS active_count
            FROM user_addons ua
            JOIN addon_products ap ON ap.id = ua.addon_id
            WHERE ua.status = 'active' AND ap.is_stackable = false
            GROUP BY ua.user_id, ua.addon_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn negative_credits(&self) -> BillingResult<Vec<ProrationCredit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_proration_credits WHERE credit_amount < 0",
            CREDIT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(credit_from_row).collect::<Result<_, _>>()?)
    }

    async fn users_with_multiple_subscriptions(&self) -> BillingResult<Vec<(Uuid, i64)>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) AS sub_count
            FROM subscriptions
            WHERE status IN ('active', 'trialing', 'past_due')
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
