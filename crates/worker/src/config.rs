//! Worker configuration

use findawise_billing::BillingConfig;

/// Six-field cron expressions (seconds first), all UTC
pub const DEFAULT_USAGE_ROLLOVER_CRON: &str = "0 5 * * * *";
pub const DEFAULT_ADDON_EXPIRY_CRON: &str = "0 15 * * * *";
pub const DEFAULT_INVARIANT_CHECK_CRON: &str = "0 0 */6 * * *";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub usage_rollover_cron: String,
    pub addon_expiry_cron: String,
    pub invariant_check_cron: String,
    pub billing: BillingConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let billing = BillingConfig::from_env().map_err(|e| ConfigError::Billing(e.to_string()))?;

        Ok(Self {
            database_url,
            usage_rollover_cron: cron_var("USAGE_ROLLOVER_CRON", DEFAULT_USAGE_ROLLOVER_CRON)?,
            addon_expiry_cron: cron_var("ADDON_EXPIRY_CRON", DEFAULT_ADDON_EXPIRY_CRON)?,
            invariant_check_cron: cron_var("INVARIANT_CHECK_CRON", DEFAULT_INVARIANT_CHECK_CRON)?,
            billing,
        })
    }
}

/// Reads a schedule, rejecting anything that is not six whitespace-separated fields
fn cron_var(key: &'static str, default: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    if value.split_whitespace().count() != 6 {
        return Err(ConfigError::Invalid(key));
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Invalid billing configuration: {0}")]
    Billing(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "DATABASE_URL",
        "USAGE_ROLLOVER_CRON",
        "ADDON_EXPIRY_CRON",
        "INVARIANT_CHECK_CRON",
    ];

    fn clear() {
        for key in VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_database_url_required() {
        clear();
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn test_default_schedules() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://localhost/findawise");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.usage_rollover_cron, DEFAULT_USAGE_ROLLOVER_CRON);
        assert_eq!(config.addon_expiry_cron, DEFAULT_ADDON_EXPIRY_CRON);
        assert_eq!(config.invariant_check_cron, DEFAULT_INVARIANT_CHECK_CRON);
        clear();
    }

    #[test]
    #[serial]
    fn test_schedule_override_and_validation() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://localhost/findawise");
        std::env::set_var("USAGE_ROLLOVER_CRON", "0 */10 * * * *");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.usage_rollover_cron, "0 */10 * * * *");

        // Five-field crontab syntax is rejected
        std::env::set_var("ADDON_EXPIRY_CRON", "*/5 * * * *");
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("ADDON_EXPIRY_CRON")));
        clear();
    }
}
