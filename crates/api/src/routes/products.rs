//! Marketplace product routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use findawise_billing::{entitlement::tier_grants, Product, ProductFacets, ProductQuery};
use findawise_shared::TierSlug;
use serde::Serialize;

use crate::{
    auth::OptionalAuthUser,
    error::ApiResult,
    state::AppState,
};

/// A product as seen by the caller
#[derive(Debug, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    /// Whether the caller's tier unlocks it; `null` for anonymous callers
    pub accessible: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<ProductView>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub facets: ProductFacets,
}

async fn caller_tier(state: &AppState, auth: &OptionalAuthUser) -> ApiResult<Option<TierSlug>> {
    match &auth.0 {
        Some(user) => Ok(Some(
            state
                .billing
                .subscriptions
                .get_user_tier(user.user_id)
                .await?
                .slug,
        )),
        None => Ok(None),
    }
}

fn view(product: Product, tier: Option<TierSlug>) -> ProductView {
    ProductView {
        accessible: tier.map(|t| tier_grants(t, product.required_tier)),
        product,
    }
}

/// GET /api/v1/products
pub async fn search_products(
    State(state): State<AppState>,
    auth: OptionalAuthUser,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Json<ProductListResponse>> {
    let page = state.billing.products.search_products(&query).await?;
    let tier = caller_tier(&state, &auth).await?;

    Ok(Json(ProductListResponse {
        products: page.products.into_iter().map(|p| view(p, tier)).collect(),
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages,
        facets: page.facets,
    }))
}

/// GET /api/v1/products/{slug}
pub async fn get_product(
    State(state): State<AppState>,
    auth: OptionalAuthUser,
    Path(slug): Path<String>,
) -> ApiResult<Json<ProductView>> {
    let product = state.billing.products.get_product(&slug).await?;
    let tier = caller_tier(&state, &auth).await?;
    Ok(Json(view(product, tier)))
}
