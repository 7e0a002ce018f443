//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use findawise_billing::BillingError;
use serde::Serialize;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Billing(#[from] BillingError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Billing(err) => match err {
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::LimitExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::AlreadyActive(_) => StatusCode::CONFLICT,
                BillingError::QuantityExceeded { .. }
                | BillingError::InvalidInput(_)
                | BillingError::InvalidTier(_) => StatusCode::BAD_REQUEST,
                BillingError::Unauthenticated => StatusCode::UNAUTHORIZED,
                BillingError::Config(_) | BillingError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Billing(err) => err.error_code(),
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Billing(BillingError::LimitExceeded {
                limit_type,
                current,
                limit,
            }) => Some(serde_json::json!({
                "limit_type": limit_type,
                "current": current,
                "limit": limit,
            })),
            Self::Billing(BillingError::QuantityExceeded { requested, max }) => {
                Some(serde_json::json!({ "requested": requested, "max": max }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Store and config failures stay opaque to clients
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "Internal API error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
