//! Billing configuration

use crate::error::{BillingError, BillingResult};

/// Tunables for the entitlement core
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    /// Soft-cap fraction written to freshly initialized usage limits, in (0, 1]
    pub default_soft_cap_threshold: f64,
    /// Lifetime of a recurring add-on purchase, in days
    pub addon_term_days: i64,
    /// How long an issued proration credit stays redeemable, in days
    pub credit_validity_days: i64,
    /// Flat discount on annual add-on billing, in percent
    pub annual_discount_percent: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_soft_cap_threshold: 0.8,
            addon_term_days: 30,
            credit_validity_days: 365,
            annual_discount_percent: 20,
        }
    }
}

impl BillingConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> BillingResult<Self> {
        let defaults = Self::default();

        let config = Self {
            default_soft_cap_threshold: env_or("SOFT_CAP_THRESHOLD", defaults.default_soft_cap_threshold)?,
            addon_term_days: env_or("ADDON_TERM_DAYS", defaults.addon_term_days)?,
            credit_validity_days: env_or("CREDIT_VALIDITY_DAYS", defaults.credit_validity_days)?,
            annual_discount_percent: env_or(
                "ANNUAL_DISCOUNT_PERCENT",
                defaults.annual_discount_percent,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the ledger's arithmetic
    pub fn validate(&self) -> BillingResult<()> {
        if !(self.default_soft_cap_threshold > 0.0 && self.default_soft_cap_threshold <= 1.0) {
            return Err(BillingError::Config(format!(
                "SOFT_CAP_THRESHOLD must be in (0, 1], got {}",
                self.default_soft_cap_threshold
            )));
        }
        if self.addon_term_days <= 0 {
            return Err(BillingError::Config(
                "ADDON_TERM_DAYS must be positive".to_string(),
            ));
        }
        if self.credit_validity_days <= 0 {
            return Err(BillingError::Config(
                "CREDIT_VALIDITY_DAYS must be positive".to_string(),
            ));
        }
        if !(0..=100).contains(&self.annual_discount_percent) {
            return Err(BillingError::Config(
                "ANNUAL_DISCOUNT_PERCENT must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &'static str, default: T) -> BillingResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BillingError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BillingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.addon_term_days, 30);
        assert_eq!(config.annual_discount_percent, 20);
    }

    #[test]
    fn test_soft_cap_bounds() {
        let mut config = BillingConfig {
            default_soft_cap_threshold: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.default_soft_cap_threshold = 1.0;
        assert!(config.validate().is_ok());
        config.default_soft_cap_threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discount_bounds() {
        let config = BillingConfig {
            annual_discount_percent: 120,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BillingError::Config(_))));
    }
}
