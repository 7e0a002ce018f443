//! Tier and add-on catalog routes

use axum::{
    extract::{Path, State},
    Json,
};
use findawise_billing::{AddonProduct, PricingTier};
use findawise_shared::TierSlug;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/v1/tiers
pub async fn list_tiers(State(state): State<AppState>) -> ApiResult<Json<Vec<PricingTier>>> {
    Ok(Json(state.billing.catalog.list_tiers().await?))
}

/// GET /api/v1/tiers/{slug}
pub async fn get_tier(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<PricingTier>> {
    let slug: TierSlug = slug
        .parse()
        .map_err(|e: findawise_shared::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.billing.catalog.get_tier_by_slug(slug).await?))
}

/// GET /api/v1/addons
pub async fn list_addons(State(state): State<AppState>) -> ApiResult<Json<Vec<AddonProduct>>> {
    Ok(Json(state.billing.catalog.list_addons().await?))
}

/// GET /api/v1/addons/{addon_id}
pub async fn get_addon(
    State(state): State<AppState>,
    Path(addon_id): Path<Uuid>,
) -> ApiResult<Json<AddonProduct>> {
    Ok(Json(state.billing.catalog.get_addon(addon_id).await?))
}
