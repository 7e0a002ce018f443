//! Subscription lifecycle routes
//!
//! Every handler acts on the caller's current subscription, so no
//! subscription id is ever taken from the client.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use findawise_billing::{
    BillingError, FeatureMap, PricingTier, ProrationCredit, ProrationPreview, Subscription,
    SubscriptionWithTier, TierChange,
};
use findawise_shared::{BillingCycle, TierSlug};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub tier: TierSlug,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default = "default_at_period_end")]
    pub at_period_end: bool,
}

fn default_at_period_end() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChangeTierRequest {
    pub tier: TierSlug,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// `null` for users on the implicit free tier
    pub subscription: Option<SubscriptionWithTier>,
}

#[derive(Debug, Serialize)]
pub struct UserTierResponse {
    pub tier: PricingTier,
    pub features: FeatureMap,
}

#[derive(Debug, Serialize)]
pub struct FeatureAccessResponse {
    pub feature: String,
    pub allowed: bool,
}

// =============================================================================
// Helpers
// =============================================================================

async fn current_subscription_id(state: &AppState, user_id: Uuid) -> ApiResult<Uuid> {
    state
        .billing
        .subscriptions
        .get_active_subscription(user_id)
        .await?
        .map(|s| s.subscription.id)
        .ok_or_else(|| BillingError::NotFound("No active subscription".to_string()).into())
}

async fn tier_id(state: &AppState, slug: TierSlug) -> ApiResult<Uuid> {
    Ok(state.billing.catalog.get_tier_by_slug(slug).await?.id)
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .billing
        .subscriptions
        .get_active_subscription(auth_user.user_id)
        .await?;
    Ok(Json(SubscriptionResponse { subscription }))
}

/// POST /api/v1/subscription
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionWithTier>)> {
    let tier_id = tier_id(&state, req.tier).await?;
    let created = state
        .billing
        .subscriptions
        .create_subscription(auth_user.user_id, tier_id, req.billing_cycle)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/v1/subscription/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CancelSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    let id = current_subscription_id(&state, auth_user.user_id).await?;
    Ok(Json(
        state
            .billing
            .subscriptions
            .cancel_subscription(id, req.at_period_end)
            .await?,
    ))
}

/// POST /api/v1/subscription/reactivate
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Subscription>> {
    let id = current_subscription_id(&state, auth_user.user_id).await?;
    Ok(Json(
        state
            .billing
            .subscriptions
            .reactivate_subscription(id)
            .await?,
    ))
}

/// POST /api/v1/subscription/upgrade
pub async fn upgrade_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangeTierRequest>,
) -> ApiResult<Json<TierChange>> {
    let id = current_subscription_id(&state, auth_user.user_id).await?;
    let new_tier = tier_id(&state, req.tier).await?;
    Ok(Json(
        state
            .billing
            .subscriptions
            .upgrade_subscription_with_proration(id, new_tier)
            .await?,
    ))
}

/// POST /api/v1/subscription/downgrade
pub async fn downgrade_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangeTierRequest>,
) -> ApiResult<Json<TierChange>> {
    let id = current_subscription_id(&state, auth_user.user_id).await?;
    let new_tier = tier_id(&state, req.tier).await?;
    Ok(Json(
        state
            .billing
            .subscriptions
            .downgrade_subscription_with_proration(id, new_tier)
            .await?,
    ))
}

/// GET /api/v1/subscription/preview?tier=
pub async fn preview_proration(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(req): Query<ChangeTierRequest>,
) -> ApiResult<Json<ProrationPreview>> {
    let id = current_subscription_id(&state, auth_user.user_id).await?;
    let new_tier = tier_id(&state, req.tier).await?;
    Ok(Json(
        state
            .billing
            .subscriptions
            .preview_proration(id, new_tier, OffsetDateTime::now_utc())
            .await?,
    ))
}

/// GET /api/v1/subscription/credits
pub async fn list_credits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ProrationCredit>>> {
    Ok(Json(
        state
            .billing
            .subscriptions
            .list_proration_credits(auth_user.user_id)
            .await?,
    ))
}

/// GET /api/v1/me/tier
pub async fn get_user_tier(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UserTierResponse>> {
    let tier = state
        .billing
        .subscriptions
        .get_user_tier(auth_user.user_id)
        .await?;
    Ok(Json(UserTierResponse {
        features: tier.features.clone(),
        tier,
    }))
}

/// GET /api/v1/me/features/{feature_key}
pub async fn check_feature(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(feature_key): Path<String>,
) -> ApiResult<Json<FeatureAccessResponse>> {
    let allowed = state
        .billing
        .subscriptions
        .can_access_feature(auth_user.user_id, &feature_key)
        .await?;
    Ok(Json(FeatureAccessResponse {
        feature: feature_key,
        allowed,
    }))
}
