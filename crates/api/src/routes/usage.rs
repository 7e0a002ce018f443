//! Usage ledger routes

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use findawise_billing::{UsageCheck, UsageEvent, UsageIncrement, UsageLimit, UsageSummary};
use findawise_shared::LimitType;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_EVENT_PAGE: usize = 50;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UsageChangeRequest {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DecrementResponse {
    /// The counter after the decrement, absent when the limit type is untracked
    pub usage_limit: Option<UsageLimit>,
}

fn parse_limit_type(raw: &str) -> ApiResult<LimitType> {
    raw.parse()
        .map_err(|e: findawise_shared::ParseEnumError| ApiError::BadRequest(e.to_string()))
}

fn validate_resource_type(resource_type: &str) -> ApiResult<()> {
    if resource_type.trim().is_empty() {
        return Err(ApiError::BadRequest("resource_type cannot be empty".into()));
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/usage
pub async fn get_usage_summary(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UsageSummary>> {
    Ok(Json(
        state.billing.usage.get_usage_summary(auth_user.user_id).await?,
    ))
}

/// GET /api/v1/usage/limits
pub async fn list_usage_limits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<UsageLimit>>> {
    Ok(Json(
        state
            .billing
            .usage
            .get_user_usage_limits(auth_user.user_id)
            .await?,
    ))
}

/// GET /api/v1/usage/{limit_type}
pub async fn check_usage_limit(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(limit_type): Path<String>,
) -> ApiResult<Json<UsageCheck>> {
    let limit_type = parse_limit_type(&limit_type)?;
    Ok(Json(
        state
            .billing
            .usage
            .check_usage_limit(auth_user.user_id, limit_type)
            .await?,
    ))
}

/// POST /api/v1/usage/{limit_type}/increment
pub async fn increment_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(limit_type): Path<String>,
    Json(req): Json<UsageChangeRequest>,
) -> ApiResult<Json<UsageIncrement>> {
    let limit_type = parse_limit_type(&limit_type)?;
    validate_resource_type(&req.resource_type)?;

    let result = state
        .billing
        .usage
        .increment_usage(
            auth_user.user_id,
            limit_type,
            &req.resource_type,
            req.resource_id,
            req.metadata,
        )
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/usage/{limit_type}/decrement
pub async fn decrement_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(limit_type): Path<String>,
    Json(req): Json<UsageChangeRequest>,
) -> ApiResult<Json<DecrementResponse>> {
    let limit_type = parse_limit_type(&limit_type)?;
    validate_resource_type(&req.resource_type)?;

    let usage_limit = state
        .billing
        .usage
        .decrement_usage(
            auth_user.user_id,
            limit_type,
            &req.resource_type,
            req.resource_id,
        )
        .await?;
    Ok(Json(DecrementResponse { usage_limit }))
}

/// GET /api/v1/usage/events
pub async fn list_usage_events(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<UsageEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_PAGE);
    Ok(Json(
        state
            .billing
            .usage
            .list_usage_events(auth_user.user_id, limit)
            .await?,
    ))
}
