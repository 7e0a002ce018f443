//! Marketplace product catalog
//!
//! Filtering, sorting, faceting and pagination over the product listing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use findawise_shared::{ParseEnumError, TierSlug};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::models::Product;
use crate::store::BillingStore;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Result ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Rating,
    Popular,
}

impl ProductSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
            Self::Rating => "rating",
            Self::Popular => "popular",
        }
    }

    fn compare(&self, a: &Product, b: &Product) -> Ordering {
        match self {
            Self::Newest => b.created_at.cmp(&a.created_at),
            Self::PriceAsc => a.price_cents.cmp(&b.price_cents),
            Self::PriceDesc => b.price_cents.cmp(&a.price_cents),
            Self::Rating => b.rating.total_cmp(&a.rating),
            Self::Popular => b.downloads.cmp(&a.downloads),
        }
    }
}

impl FromStr for ProductSort {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "price_asc" => Ok(Self::PriceAsc),
            "price_desc" => Ok(Self::PriceDesc),
            "rating" => Ok(Self::Rating),
            "popular" => Ok(Self::Popular),
            other => Err(ParseEnumError::new("product sort", other)),
        }
    }
}

/// Search parameters. Unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductQuery {
    pub category: Option<String>,
    /// Case-insensitive match against name and tags
    pub search: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub tag: Option<String>,
    /// Only products whose required tier is at or below this one
    pub max_tier: Option<TierSlug>,
    pub featured_only: bool,
    pub sort: ProductSort,
    /// 1-based
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductQuery {
    fn matches(&self, product: &Product) -> bool {
        if let Some(category) = &self.category {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let hit = product.name.to_lowercase().contains(&term)
                || product.tags.iter().any(|t| t.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| product.price_cents < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price_cents > max) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !product.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return false;
            }
        }
        if let Some(max_tier) = self.max_tier {
            if !max_tier.satisfies(product.required_tier) {
                return false;
            }
        }
        !self.featured_only || product.is_featured
    }
}

/// Counts over the filtered set, before pagination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFacets {
    pub categories: BTreeMap<String, usize>,
    pub tiers: BTreeMap<TierSlug, usize>,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub facets: ProductFacets,
}

/// Apply a query to a listing
pub fn search(products: Vec<Product>, query: &ProductQuery) -> BillingResult<ProductPage> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(BillingError::InvalidInput(format!(
                "min_price {} is greater than max_price {}",
                min, max
            )));
        }
    }

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let mut matched: Vec<Product> = products.into_iter().filter(|p| query.matches(p)).collect();
    matched.sort_by(|a, b| query.sort.compare(a, b).then_with(|| a.slug.cmp(&b.slug)));

    let mut facets = ProductFacets::default();
    for product in &matched {
        *facets.categories.entry(product.category.clone()).or_default() += 1;
        *facets.tiers.entry(product.required_tier).or_default() += 1;
    }

    let total = matched.len();
    let total_pages = total.div_ceil(per_page as usize) as u32;
    let offset = (page as usize - 1).saturating_mul(per_page as usize);
    let products = matched
        .into_iter()
        .skip(offset)
        .take(per_page as usize)
        .collect();

    Ok(ProductPage {
        products,
        total,
        page,
        per_page,
        total_pages,
        facets,
    })
}

/// Read access to marketplace products
#[derive(Clone)]
pub struct ProductCatalog {
    store: Arc<dyn BillingStore>,
}

impl ProductCatalog {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn search_products(&self, query: &ProductQuery) -> BillingResult<ProductPage> {
        let products = self.store.list_products().await?;
        let page = search(products, query)?;
        tracing::debug!(
            total = page.total,
            page = page.page,
            sort = query.sort.as_str(),
            "Searched products"
        );
        Ok(page)
    }

    pub async fn get_product(&self, slug: &str) -> BillingResult<Product> {
        self.store
            .get_product_by_slug(slug)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Product '{}' not found", slug)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_products;
    use crate::store::InMemoryStore;

    fn slugs(page: &ProductPage) -> Vec<&str> {
        page.products.iter().map(|p| p.slug.as_str()).collect()
    }

    #[test]
    fn test_default_sort_is_newest_first() {
        let page = search(default_products(), &ProductQuery::default()).unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.products[0].slug, "onboarding-email-kit");
        assert_eq!(page.products[5].slug, "lead-capture-workflow");
    }

    #[test]
    fn test_filters_combine() {
        let query = ProductQuery {
            category: Some("Workflows".into()),
            max_price: Some(2_000),
            ..Default::default()
        };
        let page = search(default_products(), &query).unwrap();
        assert_eq!(slugs(&page), vec!["social-scheduler", "lead-capture-workflow"]);

        let query = ProductQuery {
            search: Some("Agent".into()),
            sort: ProductSort::PriceAsc,
            ..Default::default()
        };
        let page = search(default_products(), &query).unwrap();
        assert_eq!(slugs(&page), vec!["support-triage-agent", "research-agent"]);
    }

    #[test]
    fn test_max_tier_and_featured() {
        let query = ProductQuery {
            max_tier: Some(TierSlug::Starter),
            sort: ProductSort::Popular,
            ..Default::default()
        };
        let page = search(default_products(), &query).unwrap();
        assert!(page
            .products
            .iter()
            .all(|p| TierSlug::Starter.satisfies(p.required_tier)));
        assert_eq!(page.products[0].slug, "onboarding-email-kit");

        let featured = search(
            default_products(),
            &ProductQuery {
                featured_only: true,
                sort: ProductSort::Rating,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(slugs(&featured), vec!["support-triage-agent", "invoice-automation"]);
    }

    #[test]
    fn test_facets_ignore_pagination() {
        let query = ProductQuery {
            per_page: Some(2),
            page: Some(3),
            ..Default::default()
        };
        let page = search(default_products(), &query).unwrap();
        assert_eq!(page.products.len(), 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.facets.categories["workflows"], 3);
        assert_eq!(page.facets.categories["agents"], 2);
        assert_eq!(page.facets.tiers[&TierSlug::Free], 2);

        let beyond = search(
            default_products(),
            &ProductQuery {
                per_page: Some(2),
                page: Some(9),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(beyond.products.is_empty());
        assert_eq!(beyond.total, 6);
    }

    #[test]
    fn test_inverted_price_range_is_rejected() {
        let query = ProductQuery {
            min_price: Some(500),
            max_price: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            search(default_products(), &query),
            Err(BillingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("price_desc".parse::<ProductSort>().unwrap(), ProductSort::PriceDesc);
        assert!("cheapest".parse::<ProductSort>().is_err());
    }

    #[tokio::test]
    async fn test_lookup_by_slug() {
        let catalog = ProductCatalog::new(Arc::new(InMemoryStore::with_default_catalog()));
        assert_eq!(
            catalog.get_product("research-agent").await.unwrap().required_tier,
            TierSlug::Enterprise
        );
        assert!(matches!(
            catalog.get_product("nope").await,
            Err(BillingError::NotFound(_))
        ));
    }
}
