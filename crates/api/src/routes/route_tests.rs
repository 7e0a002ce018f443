//! Router tests
//!
//! Drive the full router with `oneshot` against the in-memory store.

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use findawise_billing::BillingConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::{Config, LogFormat};
    use crate::routes::create_router;
    use crate::state::AppState;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            jwt_secret: "test-jwt-secret-key-for-testing-only".to_string(),
            jwt_expiry_hours: 1,
            cors_allowed_origins: vec![],
            log_format: LogFormat::Pretty,
            billing: BillingConfig::default(),
        }
    }

    /// Router plus a token for a fresh user
    fn setup() -> (Router, AppState, String) {
        let state = AppState::in_memory(test_config());
        let token = state
            .jwt_manager
            .generate_access_token(Uuid::new_v4())
            .unwrap();
        (create_router(state.clone()), state, token)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn addon_id(app: &Router, slug: &str) -> String {
        let (_, addons) = send(app, Method::GET, "/api/v1/addons", None, None).await;
        addons
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["slug"] == slug)
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    async fn subscribe(app: &Router, token: &str, tier: &str) {
        let (status, _) = send(
            app,
            Method::POST,
            "/api/v1/subscription",
            Some(token),
            Some(json!({ "tier": tier, "billing_cycle": "monthly" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_health_and_public_catalog() {
        let (app, _, _) = setup();

        let (status, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, tiers) = send(&app, Method::GET, "/api/v1/tiers", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tiers.as_array().unwrap().len(), 4);
        assert_eq!(tiers[0]["slug"], "free");

        let (status, tier) = send(&app, Method::GET, "/api/v1/tiers/starter", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tier["price_monthly"], 1900);

        let (status, _) = send(&app, Method::GET, "/api/v1/tiers/platinum", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_annual_pricing_quote() {
        let (app, _, _) = setup();
        let assets = addon_id(&app, "asset-pack-100").await;

        let (status, pricing) = send(
            &app,
            Method::GET,
            &format!("/api/v1/addons/{}/pricing?quantity=2&billing_cycle=annual", assets),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pricing["subtotal"], 12_000);
        assert_eq!(pricing["discount"], 2_400);
        assert_eq!(pricing["total"], 9_600);
    }

    #[tokio::test]
    async fn test_authentication_required() {
        let (app, _, _) = setup();

        let (status, body) = send(&app, Method::GET, "/api/v1/usage", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

        let (status, body) =
            send(&app, Method::GET, "/api/v1/usage", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_limit_exceeded_then_addon_unblocks() {
        let (app, _, token) = setup();
        subscribe(&app, &token, "starter").await;

        let increment = json!({ "resource_type": "workflow", "resource_id": "wf-1" });
        for _ in 0..5 {
            let (status, _) = send(
                &app,
                Method::POST,
                "/api/v1/usage/workflow_deployments/increment",
                Some(&token),
                Some(increment.clone()),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/usage/workflow_deployments/increment",
            Some(&token),
            Some(increment.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "LIMIT_EXCEEDED");
        assert_eq!(body["error"]["details"]["current"], 5);
        assert_eq!(body["error"]["details"]["limit"], 5);

        let pack = addon_id(&app, "workflow-pack-10").await;
        let (status, purchase) = send(
            &app,
            Method::POST,
            "/api/v1/me/addons",
            Some(&token),
            Some(json!({ "addon_id": pack })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(purchase["usage_limit"], 10);

        let (status, check) = send(
            &app,
            Method::GET,
            "/api/v1/usage/workflow_deployments",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(check["total_capacity"], 15);
        assert_eq!(check["can_proceed"], true);

        let (status, step) = send(
            &app,
            Method::POST,
            "/api/v1/usage/workflow_deployments/increment",
            Some(&token),
            Some(increment),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(step["charged"]["bucket"], "addon");

        let (_, events) = send(
            &app,
            Method::GET,
            "/api/v1/usage/events?limit=10",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(events.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_limit_type_is_bad_request() {
        let (app, _, token) = setup();
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/usage/teleports",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_non_stackable_conflict_and_ownership() {
        let (app, state, token) = setup();
        subscribe(&app, &token, "starter").await;
        let storage = addon_id(&app, "extra-storage-50").await;

        let (status, first) = send(
            &app,
            Method::POST,
            "/api/v1/me/addons",
            Some(&token),
            Some(json!({ "addon_id": storage, "auto_renew": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/me/addons",
            Some(&token),
            Some(json!({ "addon_id": storage })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_ACTIVE");

        // Another user cannot cancel it
        let intruder = state
            .jwt_manager
            .generate_access_token(Uuid::new_v4())
            .unwrap();
        let uri = format!("/api/v1/me/addons/{}", first["id"].as_str().unwrap());
        let (status, _) = send(&app, Method::DELETE, &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, canceled) = send(&app, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(canceled["status"], "canceled");
        assert_eq!(canceled["auto_renew"], false);
    }

    #[tokio::test]
    async fn test_addon_requires_minimum_tier() {
        let (app, _, token) = setup();
        let storage = addon_id(&app, "extra-storage-50").await;

        // No subscription means free tier
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/me/addons",
            Some(&token),
            Some(json!({ "addon_id": storage })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_TIER");
    }

    #[tokio::test]
    async fn test_upgrade_flow() {
        let (app, _, token) = setup();
        subscribe(&app, &token, "starter").await;

        let (status, preview) = send(
            &app,
            Method::GET,
            "/api/v1/subscription/preview?tier=professional",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["is_upgrade"], true);
        assert_eq!(preview["new_price"], 4900);

        let (status, change) = send(
            &app,
            Method::POST,
            "/api/v1/subscription/upgrade",
            Some(&token),
            Some(json!({ "tier": "professional" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(change["previous_tier"], "starter");
        assert!(change["credit"]["credit_amount"].as_i64().unwrap() > 0);

        let (_, credits) = send(
            &app,
            Method::GET,
            "/api/v1/subscription/credits",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(credits.as_array().unwrap().len(), 1);

        let (_, me) = send(&app, Method::GET, "/api/v1/me/tier", Some(&token), None).await;
        assert_eq!(me["tier"]["slug"], "professional");

        // Upgrading "up" to a lower tier is rejected
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/subscription/upgrade",
            Some(&token),
            Some(json!({ "tier": "starter" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_second_subscription_conflicts() {
        let (app, _, token) = setup();
        subscribe(&app, &token, "starter").await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/subscription",
            Some(&token),
            Some(json!({ "tier": "professional" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_then_reactivate() {
        let (app, _, token) = setup();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/subscription/cancel",
            Some(&token),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        subscribe(&app, &token, "starter").await;
        let (status, sub) = send(
            &app,
            Method::POST,
            "/api/v1/subscription/cancel",
            Some(&token),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sub["status"], "active");
        assert_eq!(sub["cancel_at_period_end"], true);

        let (status, sub) = send(
            &app,
            Method::POST,
            "/api/v1/subscription/reactivate",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sub["cancel_at_period_end"], false);
    }

    #[tokio::test]
    async fn test_products_accessible_flag() {
        let (app, _, token) = setup();

        let (status, anonymous) = send(
            &app,
            Method::GET,
            "/api/v1/products?category=agents&sort=price_asc",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(anonymous["total"], 2);
        assert!(anonymous["products"][0]["accessible"].is_null());
        assert_eq!(anonymous["facets"]["categories"]["agents"], 2);

        // Free tier: neither agent is unlocked
        let (_, free) = send(
            &app,
            Method::GET,
            "/api/v1/products?category=agents",
            Some(&token),
            None,
        )
        .await;
        assert!(free["products"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["accessible"] == false));

        subscribe(&app, &token, "enterprise").await;
        let (status, product) = send(
            &app,
            Method::GET,
            "/api/v1/products/research-agent",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(product["accessible"], true);
        assert_eq!(product["slug"], "research-agent");

        let (status, _) = send(&app, Method::GET, "/api/v1/products/missing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feature_flags() {
        let (app, _, token) = setup();

        let (_, body) = send(
            &app,
            Method::GET,
            "/api/v1/me/features/api_access",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["allowed"], false);

        // Unknown keys are not restricted
        let (_, body) = send(
            &app,
            Method::GET,
            "/api/v1/me/features/dark_mode",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["allowed"], true);
    }
}
