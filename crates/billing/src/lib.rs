// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::LimitExceeded carries display data
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Findawise Billing Module
//!
//! Entitlements and proration for the Findawise marketplace.
//!
//! ## Features
//!
//! - **Usage Ledger**: Per-period counters with add-on draw-down and an audit trail
//! - **Entitlements**: Capacity, percentage and soft-cap warning computation
//! - **Add-ons**: Purchase, cancel, price and recommend capacity packs
//! - **Subscriptions**: Lifecycle plus upgrade/downgrade with proration credits
//! - **Products**: Marketplace search gated by tier
//! - **Invariants**: Read-only consistency sweeps

pub mod addons;
pub mod catalog;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod models;
pub mod products;
pub mod store;
pub mod subscriptions;
pub mod usage;


use std::sync::Arc;

// Add-ons
pub use addons::{
    AddonExpirySummary, AddonPricing, AddonRecommendation, AddonService, RecommendationPriority,
};

// Catalog
pub use catalog::CatalogService;

// Config
pub use config::BillingConfig;

// Entitlement
pub use entitlement::{LimitUsage, UsageCheck, UsageSummary};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{UsageEventBuilder, UsageEventLogger};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Models
pub use models::{
    AddonProduct, FeatureMap, FeatureValue, PricingTier, Product, ProrationCredit, Subscription,
    SubscriptionWithTier, UsageEvent, UsageLimit, UserAddon, UserAddonWithProduct,
};

// Products
pub use products::{ProductCatalog, ProductFacets, ProductPage, ProductQuery, ProductSort};

// Store
pub use store::{BillingStore, InMemoryStore, PgStore};

// Subscriptions
pub use subscriptions::{ProrationPreview, SubscriptionService, TierChange};

// Usage
pub use usage::{ChargedBucket, UsageIncrement, UsageLedger};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub addons: AddonService,
    pub catalog: CatalogService,
    pub events: UsageEventLogger,
    pub invariants: InvariantChecker,
    pub products: ProductCatalog,
    pub subscriptions: SubscriptionService,
    pub usage: UsageLedger,
    pub config: BillingConfig,
}

impl BillingService {
    /// Create a new billing service over a store
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        let usage = UsageLedger::new(store.clone(), config.clone());

        Self {
            addons: AddonService::new(store.clone(), config.clone()),
            catalog: CatalogService::new(store.clone()),
            events: UsageEventLogger::new(store.clone()),
            invariants: InvariantChecker::new(store.clone()),
            products: ProductCatalog::new(store.clone()),
            subscriptions: SubscriptionService::new(store, config.clone(), usage.clone()),
            usage,
            config,
        }
    }

    /// Create a billing service backed by Postgres, reading tunables from the environment
    pub fn from_env(pool: sqlx::PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        Ok(Self::new(Arc::new(PgStore::new(pool)), config))
    }

    /// In-memory store seeded with the default catalog
    pub fn in_memory(config: BillingConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::with_default_catalog()), config)
    }
}
