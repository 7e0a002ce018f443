//! Add-on purchase routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use findawise_billing::{AddonPricing, AddonRecommendation, UserAddon, UserAddonWithProduct};
use findawise_shared::BillingCycle;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PurchaseAddonRequest {
    pub addon_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub auto_renew: bool,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct PricingQuery {
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Deserialize)]
pub struct ListAddonsQuery {
    /// Only purchases that are active and unexpired
    #[serde(default)]
    pub active: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/addons/{addon_id}/pricing
pub async fn calculate_pricing(
    State(state): State<AppState>,
    Path(addon_id): Path<Uuid>,
    Query(query): Query<PricingQuery>,
) -> ApiResult<Json<AddonPricing>> {
    Ok(Json(
        state
            .billing
            .addons
            .calculate_addon_pricing(addon_id, query.quantity, query.billing_cycle)
            .await?,
    ))
}

/// GET /api/v1/me/addons
pub async fn list_user_addons(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListAddonsQuery>,
) -> ApiResult<Json<Vec<UserAddonWithProduct>>> {
    let addons = if query.active {
        state
            .billing
            .addons
            .list_active_user_addons(auth_user.user_id, OffsetDateTime::now_utc())
            .await?
    } else {
        state.billing.addons.list_user_addons(auth_user.user_id).await?
    };
    Ok(Json(addons))
}

/// POST /api/v1/me/addons
pub async fn purchase_addon(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PurchaseAddonRequest>,
) -> ApiResult<(StatusCode, Json<UserAddonWithProduct>)> {
    let purchase = state
        .billing
        .addons
        .purchase_addon(auth_user.user_id, req.addon_id, req.quantity, req.auto_renew)
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

/// DELETE /api/v1/me/addons/{user_addon_id}
pub async fn cancel_addon(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_addon_id): Path<Uuid>,
) -> ApiResult<Json<UserAddon>> {
    Ok(Json(
        state
            .billing
            .addons
            .cancel_user_addon(auth_user.user_id, user_addon_id)
            .await?,
    ))
}

/// GET /api/v1/me/addons/recommendations
pub async fn get_recommended_addons(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<AddonRecommendation>>> {
    Ok(Json(
        state
            .billing
            .addons
            .get_recommended_addons(auth_user.user_id)
            .await?,
    ))
}
