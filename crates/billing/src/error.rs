//! Billing error types

use findawise_shared::{LimitType, ParseEnumError};
use thiserror::Error;

/// Result alias used throughout the billing crate
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors surfaced by the entitlement core.
///
/// Business-rule rejections (`LimitExceeded`, `AlreadyActive`,
/// `QuantityExceeded`) are kept apart from store failures so callers can
/// prompt an upgrade instead of reporting a fault.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Usage limit reached for {limit_type}: {current} of {limit} used")]
    LimitExceeded {
        limit_type: LimitType,
        current: i64,
        limit: i64,
    },

    #[error("Already active: {0}")]
    AlreadyActive(String),

    #[error("Requested quantity {requested} exceeds the maximum of {max}")]
    QuantityExceeded { requested: u32, max: u32 },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The data store rejected a read or write
    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    /// True for rejections caused by billing rules rather than infrastructure
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            Self::LimitExceeded { .. } | Self::AlreadyActive(_) | Self::QuantityExceeded { .. }
        )
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::AlreadyActive(_) => "ALREADY_ACTIVE",
            Self::QuantityExceeded { .. } => "QUANTITY_EXCEEDED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidTier(_) => "INVALID_TIER",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "STORE_FAILURE",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Record not found".to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Self::AlreadyActive(db_err.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<ParseEnumError> for BillingError {
    fn from(err: ParseEnumError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rule_classification() {
        let limit = BillingError::LimitExceeded {
            limit_type: LimitType::Agents,
            current: 3,
            limit: 3,
        };
        assert!(limit.is_business_rule());
        assert!(BillingError::AlreadyActive("x".into()).is_business_rule());
        assert!(BillingError::QuantityExceeded { requested: 5, max: 2 }.is_business_rule());
        assert!(!BillingError::Database("timeout".into()).is_business_rule());
        assert!(!BillingError::NotFound("x".into()).is_business_rule());
    }

    #[test]
    fn test_limit_exceeded_message_carries_counts() {
        let err = BillingError::LimitExceeded {
            limit_type: LimitType::WorkflowDeployments,
            current: 5,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "Usage limit reached for workflow_deployments: 5 of 5 used"
        );
        assert_eq!(err.error_code(), "LIMIT_EXCEEDED");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: BillingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}
