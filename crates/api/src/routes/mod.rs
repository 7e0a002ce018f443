//! HTTP routes
//!
//! Public catalog reads sit at the top level; everything under the
//! authenticated router acts on the caller's own user id.

pub mod addons;
pub mod catalog;
pub mod products;
pub mod subscriptions;
pub mod usage;

#[cfg(test)]
mod route_tests;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::{optional_auth, require_auth};
use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/v1/tiers", get(catalog::list_tiers))
        .route("/api/v1/tiers/{slug}", get(catalog::get_tier))
        .route("/api/v1/addons", get(catalog::list_addons))
        .route("/api/v1/addons/{addon_id}", get(catalog::get_addon))
        .route(
            "/api/v1/addons/{addon_id}/pricing",
            get(addons::calculate_pricing),
        );

    let browse = Router::new()
        .route("/api/v1/products", get(products::search_products))
        .route("/api/v1/products/{slug}", get(products::get_product))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let authenticated = Router::new()
        // Usage
        .route("/api/v1/usage", get(usage::get_usage_summary))
        .route("/api/v1/usage/limits", get(usage::list_usage_limits))
        .route("/api/v1/usage/events", get(usage::list_usage_events))
        .route("/api/v1/usage/{limit_type}", get(usage::check_usage_limit))
        .route(
            "/api/v1/usage/{limit_type}/increment",
            post(usage::increment_usage),
        )
        .route(
            "/api/v1/usage/{limit_type}/decrement",
            post(usage::decrement_usage),
        )
        // Add-ons
        .route(
            "/api/v1/me/addons",
            get(addons::list_user_addons).post(addons::purchase_addon),
        )
        .route(
            "/api/v1/me/addons/recommendations",
            get(addons::get_recommended_addons),
        )
        .route("/api/v1/me/addons/{user_addon_id}", delete(addons::cancel_addon))
        // Subscription
        .route(
            "/api/v1/subscription",
            get(subscriptions::get_subscription).post(subscriptions::create_subscription),
        )
        .route(
            "/api/v1/subscription/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/v1/subscription/reactivate",
            post(subscriptions::reactivate_subscription),
        )
        .route(
            "/api/v1/subscription/upgrade",
            post(subscriptions::upgrade_subscription),
        )
        .route(
            "/api/v1/subscription/downgrade",
            post(subscriptions::downgrade_subscription),
        )
        .route(
            "/api/v1/subscription/preview",
            get(subscriptions::preview_proration),
        )
        .route(
            "/api/v1/subscription/credits",
            get(subscriptions::list_credits),
        )
        .route("/api/v1/me/tier", get(subscriptions::get_user_tier))
        .route(
            "/api/v1/me/features/{feature_key}",
            get(subscriptions::check_feature),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(browse)
        .merge(authenticated)
        .with_state(state)
}

/// CORS restricted to the configured origins
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    tracing::info!(
        allowed_origins = ?allowed,
        "CORS configured with {} allowed origins",
        allowed.len()
    );

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
