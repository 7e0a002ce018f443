//! Common types used across Findawise

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Universal "unlimited" sentinel for tier limits, usage limits and feature maps
pub const UNLIMITED: i64 = -1;

/// Error returned when a wire string does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Tiers
// =============================================================================

/// Pricing tier slug. Declaration order is the access hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierSlug {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl Default for TierSlug {
    fn default() -> Self {
        Self::Free
    }
}

impl TierSlug {
    /// Fixed hierarchy, lowest first
    pub const ORDER: [TierSlug; 4] = [
        TierSlug::Free,
        TierSlug::Starter,
        TierSlug::Professional,
        TierSlug::Enterprise,
    ];

    /// Position in the hierarchy (free = 0)
    pub fn rank(&self) -> usize {
        match self {
            Self::Free => 0,
            Self::Starter => 1,
            Self::Professional => 2,
            Self::Enterprise => 3,
        }
    }

    /// True when a holder of this tier may use something gated to `required`
    pub fn satisfies(&self, required: TierSlug) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for TierSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierSlug {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "professional" | "pro" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(ParseEnumError::new("tier", s)),
        }
    }
}

// =============================================================================
// Usage limits and add-on types
// =============================================================================

/// Metered resource a usage limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    WorkflowDeployments,
    Agents,
    AssetDownloads,
    ToolUses,
    ApiCalls,
    StorageGb,
    BandwidthGb,
}

impl LimitType {
    pub const ALL: [LimitType; 7] = [
        LimitType::WorkflowDeployments,
        LimitType::Agents,
        LimitType::AssetDownloads,
        LimitType::ToolUses,
        LimitType::ApiCalls,
        LimitType::StorageGb,
        LimitType::BandwidthGb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowDeployments => "workflow_deployments",
            Self::Agents => "agents",
            Self::AssetDownloads => "asset_downloads",
            Self::ToolUses => "tool_uses",
            Self::ApiCalls => "api_calls",
            Self::StorageGb => "storage_gb",
            Self::BandwidthGb => "bandwidth_gb",
        }
    }

    /// Human-readable resource name used in warnings
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::WorkflowDeployments => "workflow deployments",
            Self::Agents => "agents",
            Self::AssetDownloads => "asset downloads",
            Self::ToolUses => "tool uses",
            Self::ApiCalls => "API calls",
            Self::StorageGb => "storage",
            Self::BandwidthGb => "bandwidth",
        }
    }

    /// The add-on type that extends this limit
    pub fn addon_type(&self) -> AddonType {
        match self {
            Self::WorkflowDeployments => AddonType::WorkflowCapacity,
            Self::Agents => AddonType::AgentCapacity,
            Self::AssetDownloads => AddonType::AssetCapacity,
            Self::ToolUses => AddonType::ToolCapacity,
            Self::ApiCalls => AddonType::ApiCapacity,
            Self::StorageGb => AddonType::Storage,
            Self::BandwidthGb => AddonType::Bandwidth,
        }
    }

    /// Audit event recorded when one unit is consumed
    pub fn usage_event(&self) -> UsageEventType {
        match self {
            Self::WorkflowDeployments => UsageEventType::WorkflowDeployed,
            Self::Agents => UsageEventType::AgentCreated,
            Self::AssetDownloads => UsageEventType::AssetDownloaded,
            Self::ToolUses => UsageEventType::ToolUsed,
            Self::ApiCalls => UsageEventType::ApiCall,
            Self::StorageGb => UsageEventType::StorageUsed,
            Self::BandwidthGb => UsageEventType::BandwidthUsed,
        }
    }

    /// Audit event recorded when one unit is released.
    /// Only workflows and agents have a deletion event.
    pub fn deletion_event(&self) -> Option<UsageEventType> {
        match self {
            Self::WorkflowDeployments => Some(UsageEventType::WorkflowDeleted),
            Self::Agents => Some(UsageEventType::AgentDeleted),
            _ => None,
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LimitType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("limit type", s))
    }
}

/// Capacity category an add-on product grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonType {
    WorkflowCapacity,
    AgentCapacity,
    AssetCapacity,
    ToolCapacity,
    ApiCapacity,
    Storage,
    Bandwidth,
}

impl AddonType {
    pub const ALL: [AddonType; 7] = [
        AddonType::WorkflowCapacity,
        AddonType::AgentCapacity,
        AddonType::AssetCapacity,
        AddonType::ToolCapacity,
        AddonType::ApiCapacity,
        AddonType::Storage,
        AddonType::Bandwidth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowCapacity => "workflow_capacity",
            Self::AgentCapacity => "agent_capacity",
            Self::AssetCapacity => "asset_capacity",
            Self::ToolCapacity => "tool_capacity",
            Self::ApiCapacity => "api_capacity",
            Self::Storage => "storage",
            Self::Bandwidth => "bandwidth",
        }
    }

    /// Inverse of [`LimitType::addon_type`]
    pub fn limit_type(&self) -> LimitType {
        match self {
            Self::WorkflowCapacity => LimitType::WorkflowDeployments,
            Self::AgentCapacity => LimitType::Agents,
            Self::AssetCapacity => LimitType::AssetDownloads,
            Self::ToolCapacity => LimitType::ToolUses,
            Self::ApiCapacity => LimitType::ApiCalls,
            Self::Storage => LimitType::StorageGb,
            Self::Bandwidth => LimitType::BandwidthGb,
        }
    }
}

impl fmt::Display for AddonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddonType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AddonType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("add-on type", s))
    }
}

/// Immutable usage audit event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    WorkflowDeployed,
    AgentCreated,
    AssetDownloaded,
    ToolUsed,
    ApiCall,
    StorageUsed,
    BandwidthUsed,
    WorkflowDeleted,
    AgentDeleted,
}

impl UsageEventType {
    pub const ALL: [UsageEventType; 9] = [
        UsageEventType::WorkflowDeployed,
        UsageEventType::AgentCreated,
        UsageEventType::AssetDownloaded,
        UsageEventType::ToolUsed,
        UsageEventType::ApiCall,
        UsageEventType::StorageUsed,
        UsageEventType::BandwidthUsed,
        UsageEventType::WorkflowDeleted,
        UsageEventType::AgentDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowDeployed => "workflow_deployed",
            Self::AgentCreated => "agent_created",
            Self::AssetDownloaded => "asset_downloaded",
            Self::ToolUsed => "tool_used",
            Self::ApiCall => "api_call",
            Self::StorageUsed => "storage_used",
            Self::BandwidthUsed => "bandwidth_used",
            Self::WorkflowDeleted => "workflow_deleted",
            Self::AgentDeleted => "agent_deleted",
        }
    }
}

impl fmt::Display for UsageEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageEventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsageEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("usage event type", s))
    }
}

// =============================================================================
// Billing enums
// =============================================================================

/// Subscription billing cycle. "annual" is accepted as an alias of yearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    #[serde(alias = "annual")]
    Yearly,
}

impl Default for BillingCycle {
    fn default() -> Self {
        Self::Monthly
    }
}

impl BillingCycle {
    /// Length of one period in calendar months
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "annual" | "year" => Ok(Self::Yearly),
            _ => Err(ParseEnumError::new("billing cycle", s)),
        }
    }
}

/// How an add-on is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    OneTime,
    Recurring,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Recurring => "recurring",
        }
    }
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(Self::OneTime),
            "recurring" => Ok(Self::Recurring),
            _ => Err(ParseEnumError::new("billing type", s)),
        }
    }
}

/// Subscription status
///
/// `incomplete -> trialing | active`, `active -> canceled | past_due`.
/// `canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Trialing,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
            Self::Trialing => "trialing",
            Self::Incomplete => "incomplete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "past_due" => Ok(Self::PastDue),
            "trialing" => Ok(Self::Trialing),
            "incomplete" => Ok(Self::Incomplete),
            _ => Err(ParseEnumError::new("subscription status", s)),
        }
    }
}

/// Lifecycle of a purchased add-on. Records are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonStatus {
    Active,
    Expired,
    Canceled,
}

impl AddonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddonStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(ParseEnumError::new("add-on status", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_hierarchy() {
        assert!(TierSlug::Enterprise.satisfies(TierSlug::Professional));
        assert!(TierSlug::Starter.satisfies(TierSlug::Starter));
        assert!(!TierSlug::Free.satisfies(TierSlug::Starter));
        for (i, tier) in TierSlug::ORDER.iter().enumerate() {
            assert_eq!(tier.rank(), i);
        }
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Professional".parse::<TierSlug>(), Ok(TierSlug::Professional));
        assert_eq!("pro".parse::<TierSlug>(), Ok(TierSlug::Professional));
        assert!("platinum".parse::<TierSlug>().is_err());
    }

    #[test]
    fn test_limit_to_addon_mapping_round_trips() {
        for limit in LimitType::ALL {
            assert_eq!(limit.addon_type().limit_type(), limit);
        }
        assert_eq!(
            LimitType::WorkflowDeployments.addon_type(),
            AddonType::WorkflowCapacity
        );
        assert_eq!(LimitType::ApiCalls.addon_type(), AddonType::ApiCapacity);
    }

    #[test]
    fn test_deletion_events_only_for_workflows_and_agents() {
        let with_deletion: Vec<_> = LimitType::ALL
            .into_iter()
            .filter(|t| t.deletion_event().is_some())
            .collect();
        assert_eq!(
            with_deletion,
            vec![LimitType::WorkflowDeployments, LimitType::Agents]
        );
    }

    #[test]
    fn test_billing_cycle_accepts_annual() {
        assert_eq!("annual".parse::<BillingCycle>(), Ok(BillingCycle::Yearly));
        let cycle: BillingCycle = serde_json::from_str("\"annual\"").unwrap();
        assert_eq!(cycle, BillingCycle::Yearly);
        assert_eq!(serde_json::to_string(&cycle).unwrap(), "\"yearly\"");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
        assert_eq!("cancelled".parse::<AddonStatus>(), Ok(AddonStatus::Canceled));
        assert!(SubscriptionStatus::Canceled.is_terminal());
    }
}
