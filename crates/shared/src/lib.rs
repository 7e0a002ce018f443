#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Findawise shared types
//!
//! Tier slugs, limit and add-on types, the fixed mapping tables between them,
//! billing period arithmetic and database pool helpers.

pub mod db;
pub mod period;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use period::{add_months, days_ceil, period_end, roll_forward};
pub use types::{
    AddonStatus, AddonType, BillingCycle, BillingType, LimitType, ParseEnumError,
    SubscriptionStatus, TierSlug, UsageEventType, UNLIMITED,
};
