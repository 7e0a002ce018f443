//! Billing data model
//!
//! Monetary amounts are integer cents. Timestamps serialize as RFC 3339.

use std::collections::BTreeMap;

use findawise_shared::{
    AddonStatus, AddonType, BillingCycle, BillingType, LimitType, SubscriptionStatus, TierSlug,
    UsageEventType, UNLIMITED,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Value of one entry in a tier's feature map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    /// Integer limit, or [`UNLIMITED`]
    Limit(i64),
}

pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// A subscription plan. Reference data, never mutated by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub id: Uuid,
    pub slug: TierSlug,
    pub name: String,
    pub price_monthly: i64,
    pub price_yearly: i64,
    pub features: FeatureMap,
    pub is_active: bool,
    pub sort_order: i32,
}

impl PricingTier {
    /// Price of one period of the given cycle
    pub fn price_for(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.price_monthly,
            BillingCycle::Yearly => self.price_yearly,
        }
    }

    /// Limit this tier grants for a resource.
    /// `None` when the feature map does not mention it.
    pub fn limit_for(&self, limit_type: LimitType) -> Option<i64> {
        match self.features.get(limit_type.as_str())? {
            FeatureValue::Limit(value) => Some(*value),
            FeatureValue::Flag(true) => Some(UNLIMITED),
            FeatureValue::Flag(false) => Some(0),
        }
    }
}

/// A purchasable capacity add-on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonProduct {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub addon_type: AddonType,
    /// Capacity granted per unit purchased
    pub quantity: i64,
    /// Cents per unit
    pub price: i64,
    pub billing_type: BillingType,
    pub minimum_tier: TierSlug,
    pub is_stackable: bool,
    pub max_quantity: Option<u32>,
    pub is_active: bool,
}

/// Per-user, per-resource counter for the current billing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLimit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub limit_type: LimitType,
    /// Ceiling for the period, or [`UNLIMITED`]
    pub limit_value: i64,
    pub current_value: i64,
    /// Fraction of total capacity at which a warning is raised
    pub soft_cap_threshold: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reset_at: OffsetDateTime,
}

impl UsageLimit {
    pub fn is_unlimited(&self) -> bool {
        self.limit_value == UNLIMITED
    }

    /// Whether the row's period has not yet ended
    pub fn is_current(&self, now: OffsetDateTime) -> bool {
        self.period_end >= now
    }
}

/// An add-on purchase owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAddon {
    pub id: Uuid,
    pub user_id: Uuid,
    pub addon_id: Uuid,
    pub quantity: u32,
    pub status: AddonStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub purchased_at: OffsetDateTime,
    /// `None` for one-time purchases that never lapse
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub usage_current: i64,
    /// `addon.quantity * quantity`
    pub usage_limit: i64,
}

impl UserAddon {
    /// Active and not past its expiry
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.status == AddonStatus::Active && self.expires_at.map_or(true, |at| at > now)
    }

    /// Capacity not yet consumed
    pub fn remaining(&self) -> i64 {
        (self.usage_limit - self.usage_current).max(0)
    }
}

/// A user add-on joined with its product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAddonWithProduct {
    #[serde(flatten)]
    pub user_addon: UserAddon,
    pub addon: AddonProduct,
}

/// A user's plan subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A subscription together with its resolved tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionWithTier {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub tier: PricingTier,
}

/// Credit issued for unused time when upgrading mid-period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProrationCredit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    /// Cents, never negative
    pub credit_amount: i64,
    pub reason: String,
    /// Flipped by the external invoicing system when redeemed
    pub is_applied: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Immutable audit record of one unit consumed or released
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: UsageEventType,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Marketplace product listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    pub required_tier: TierSlug,
    pub tags: Vec<String>,
    pub rating: f64,
    pub downloads: i64,
    pub is_featured: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn tier_with(features: &[(&str, FeatureValue)]) -> PricingTier {
        PricingTier {
            id: Uuid::new_v4(),
            slug: TierSlug::Starter,
            name: "Starter".into(),
            price_monthly: 1900,
            price_yearly: 19000,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            is_active: true,
            sort_order: 1,
        }
    }

    #[test]
    fn test_feature_value_json_shapes() {
        let map: FeatureMap =
            serde_json::from_str(r#"{"agents": 3, "api_calls": -1, "priority_support": false}"#)
                .unwrap();
        assert_eq!(map["agents"], FeatureValue::Limit(3));
        assert_eq!(map["api_calls"], FeatureValue::Limit(UNLIMITED));
        assert_eq!(map["priority_support"], FeatureValue::Flag(false));
    }

    #[test]
    fn test_tier_limit_lookup() {
        let tier = tier_with(&[
            ("agents", FeatureValue::Limit(3)),
            ("tool_uses", FeatureValue::Flag(true)),
        ]);
        assert_eq!(tier.limit_for(LimitType::Agents), Some(3));
        assert_eq!(tier.limit_for(LimitType::ToolUses), Some(UNLIMITED));
        assert_eq!(tier.limit_for(LimitType::ApiCalls), None);
        assert_eq!(tier.price_for(BillingCycle::Yearly), 19000);
    }

    #[test]
    fn test_user_addon_liveness() {
        let now = datetime!(2025-06-01 00:00 UTC);
        let mut addon = UserAddon {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            addon_id: Uuid::new_v4(),
            quantity: 2,
            status: AddonStatus::Active,
            purchased_at: datetime!(2025-05-20 00:00 UTC),
            expires_at: None,
            auto_renew: false,
            usage_current: 25,
            usage_limit: 20,
        };
        assert!(addon.is_live(now));
        assert_eq!(addon.remaining(), 0);

        addon.expires_at = Some(datetime!(2025-05-31 00:00 UTC));
        assert!(!addon.is_live(now));

        addon.expires_at = None;
        addon.status = AddonStatus::Canceled;
        assert!(!addon.is_live(now));
    }

    #[test]
    fn test_usage_limit_serializes_rfc3339() {
        let limit = UsageLimit {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            limit_type: LimitType::Agents,
            limit_value: 5,
            current_value: 1,
            soft_cap_threshold: 0.8,
            period_start: datetime!(2025-01-01 00:00 UTC),
            period_end: datetime!(2025-02-01 00:00 UTC),
            last_reset_at: datetime!(2025-01-01 00:00 UTC),
        };
        let json = serde_json::to_value(&limit).unwrap();
        assert_eq!(json["period_end"], "2025-02-01T00:00:00Z");
        assert_eq!(json["limit_type"], "agents");
    }
}
