//! Entitlement engine
//!
//! Answers "may this user consume one more unit of X now?" by combining the
//! usage ledger row for X with the remaining capacity of the user's live
//! add-ons. Everything here is a pure function of its inputs; the services in
//! `usage` and `addons` load the rows and call in.

use std::collections::BTreeMap;

use findawise_shared::{LimitType, TierSlug, UNLIMITED};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::models::{FeatureMap, FeatureValue, UsageLimit, UserAddonWithProduct};

/// Result of checking one limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageCheck {
    pub limit_type: LimitType,
    pub can_proceed: bool,
    pub current: i64,
    /// Base tier limit, or [`UNLIMITED`]
    pub limit: i64,
    pub addon_capacity: i64,
    /// `limit + addon_capacity`, or [`UNLIMITED`]
    pub total_capacity: i64,
    pub is_unlimited: bool,
    /// Utilization has crossed the soft cap
    pub approaching_limit: bool,
    /// 0-100 scale
    pub percentage: f64,
}

impl UsageCheck {
    /// Check for a resource the user has no ledger row for
    pub fn unrestricted(limit_type: LimitType) -> Self {
        Self {
            limit_type,
            can_proceed: true,
            current: 0,
            limit: UNLIMITED,
            addon_capacity: 0,
            total_capacity: UNLIMITED,
            is_unlimited: true,
            approaching_limit: false,
            percentage: 0.0,
        }
    }
}

/// Per-limit line of a usage summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitUsage {
    #[serde(flatten)]
    pub limit: UsageLimit,
    pub addon_capacity: i64,
    pub total_capacity: i64,
    pub percentage: f64,
}

/// Dashboard view of every limit the user has
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub limits: Vec<LimitUsage>,
    pub percentages: BTreeMap<LimitType, f64>,
    pub warnings: Vec<String>,
}

/// Remaining add-on capacity for a limit type.
///
/// Sums `usage_limit - usage_current` over the user's active, unexpired
/// add-ons whose type maps to `limit_type`.
pub fn addon_capacity_for(
    limit_type: LimitType,
    user_addons: &[UserAddonWithProduct],
    now: OffsetDateTime,
) -> i64 {
    let addon_type = limit_type.addon_type();
    user_addons
        .iter()
        .filter(|ua| ua.addon.addon_type == addon_type && ua.user_addon.is_live(now))
        .map(|ua| ua.user_addon.remaining())
        .sum()
}

/// Utilization in percent.
///
/// Unlimited rows report 0. When the tier grants nothing and no add-on
/// compensates, any usage counts as 100%.
pub fn usage_percentage(limit: &UsageLimit, addon_capacity: i64) -> f64 {
    if limit.is_unlimited() {
        return 0.0;
    }
    let total = limit.limit_value + addon_capacity;
    if total <= 0 {
        return if limit.current_value > 0 { 100.0 } else { 0.0 };
    }
    limit.current_value as f64 / total as f64 * 100.0
}

/// `limit + addon_capacity`, or [`UNLIMITED`] for unlimited rows
pub fn total_capacity(limit: &UsageLimit, addon_capacity: i64) -> i64 {
    if limit.is_unlimited() {
        UNLIMITED
    } else {
        limit.limit_value + addon_capacity
    }
}

/// Evaluate one ledger row against the user's add-ons
pub fn check_limit(limit: &UsageLimit, addon_capacity: i64) -> UsageCheck {
    if limit.is_unlimited() {
        return UsageCheck {
            current: limit.current_value,
            ..UsageCheck::unrestricted(limit.limit_type)
        };
    }

    let total_capacity = total_capacity(limit, addon_capacity);
    let percentage = usage_percentage(limit, addon_capacity);

    UsageCheck {
        limit_type: limit.limit_type,
        can_proceed: limit.current_value < total_capacity,
        current: limit.current_value,
        limit: limit.limit_value,
        addon_capacity,
        total_capacity,
        is_unlimited: false,
        approaching_limit: percentage >= limit.soft_cap_threshold * 100.0,
        percentage,
    }
}

/// Warning for a row past its soft cap, `None` otherwise
pub fn usage_warning(limit: &UsageLimit, percentage: f64) -> Option<String> {
    if limit.is_unlimited() || percentage < limit.soft_cap_threshold * 100.0 {
        return None;
    }
    Some(format!(
        "You have used {:.0}% of your {} limit",
        percentage,
        limit.limit_type.display_name()
    ))
}

/// Warnings for every limit past its soft cap
pub fn usage_warnings(
    limits: &[UsageLimit],
    user_addons: &[UserAddonWithProduct],
    now: OffsetDateTime,
) -> Vec<String> {
    limits
        .iter()
        .filter_map(|limit| {
            let capacity = addon_capacity_for(limit.limit_type, user_addons, now);
            usage_warning(limit, usage_percentage(limit, capacity))
        })
        .collect()
}

/// Build the dashboard summary
pub fn summarize(
    limits: Vec<UsageLimit>,
    user_addons: &[UserAddonWithProduct],
    now: OffsetDateTime,
) -> UsageSummary {
    let mut percentages = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut lines = Vec::with_capacity(limits.len());

    for limit in limits {
        let addon_capacity = addon_capacity_for(limit.limit_type, user_addons, now);
        let percentage = usage_percentage(&limit, addon_capacity);
        let total_capacity = total_capacity(&limit, addon_capacity);

        percentages.insert(limit.limit_type, percentage);
        if let Some(warning) = usage_warning(&limit, percentage) {
            warnings.push(warning);
        }
        lines.push(LimitUsage {
            limit,
            addon_capacity,
            total_capacity,
            percentage,
        });
    }

    UsageSummary {
        limits: lines,
        percentages,
        warnings,
    }
}

/// Feature gate. Only an explicit `false` denies; absent keys are allowed.
pub fn can_access_feature(features: &FeatureMap, feature_key: &str) -> bool {
    !matches!(features.get(feature_key), Some(FeatureValue::Flag(false)))
}

/// Tier gate over the fixed order free < starter < professional < enterprise
pub fn tier_grants(user_tier: TierSlug, required: TierSlug) -> bool {
    user_tier.satisfies(required)
}
