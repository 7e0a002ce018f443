//! Application state

use std::sync::Arc;

use findawise_billing::{BillingService, BillingStore, InMemoryStore, PgStore};

use crate::{auth::JwtManager, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn BillingStore>) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let billing = Arc::new(BillingService::new(store, config.billing.clone()));

        Self {
            config,
            jwt_manager,
            billing,
        }
    }

    /// State over Postgres
    pub fn with_pool(config: Config, pool: sqlx::PgPool) -> Self {
        tracing::info!("Billing store: postgres");
        Self::new(config, Arc::new(PgStore::new(pool)))
    }

    /// State over the in-memory store seeded with the default catalog
    pub fn in_memory(config: Config) -> Self {
        tracing::warn!("DATABASE_URL not set - using in-memory billing store, data is not persisted");
        Self::new(config, Arc::new(InMemoryStore::with_default_catalog()))
    }
}
