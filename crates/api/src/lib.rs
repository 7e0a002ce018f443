// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Findawise API Library
//!
//! HTTP surface over the billing core: catalog reads, usage metering,
//! add-on purchases, subscription changes and marketplace search.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{ApiError, ApiResult};
pub use routes::{cors_layer, create_router};
pub use state::AppState;
