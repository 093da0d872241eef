//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment
//! variables into a type-safe struct.
//!
//! The config owns nothing processor-specific beyond credentials and base
//! URLs; each processor client receives its slice of the config through
//! its constructor.

use serde::Deserialize;

use crate::error::AppError;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `GATEWAY_BASE_URL`, `GATEWAY_SECRET_KEY`, `GATEWAY_WEBHOOK_SECRET`,
///   `GATEWAY_CALLBACK_URL`: card/mobile-money gateway credentials
/// - `ONRAMP_BASE_URL`, `ONRAMP_API_KEY`, `ONRAMP_API_SECRET`,
///   `ONRAMP_WEBHOOK_SECRET`, `ONRAMP_SETTLEMENT_WALLET`: crypto on-ramp
///   aggregator credentials
/// - `ONRAMP_ENVIRONMENT` (optional): `staging` (default) or `production`
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    // Gateway processor (synchronous-initialize, HMAC-SHA512 webhooks)
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_webhook_secret: String,
    pub gateway_callback_url: String,

    // On-ramp aggregator (quote + STK push, secret-equality webhooks)
    pub onramp_base_url: String,
    pub onramp_api_key: String,
    pub onramp_api_secret: String,
    pub onramp_webhook_secret: String,
    pub onramp_settlement_wallet: String,

    #[serde(default)]
    pub onramp_environment: ProcessorEnvironment,
}

/// Environment selector for the aggregator (separate staging and
/// production API surfaces).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorEnvironment {
    #[default]
    Staging,
    Production,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Attempts to load a `.env` file first (optional), then reads
    /// environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing, cannot be
    /// parsed, or the configured URLs are not valid URLs.
    pub fn from_env() -> anyhow::Result<Self> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check the configured URLs before the server starts.
    ///
    /// A malformed base URL would otherwise only surface on the first
    /// outbound processor call.
    fn validate(&self) -> Result<(), AppError> {
        for (name, value) in [
            ("GATEWAY_BASE_URL", &self.gateway_base_url),
            ("GATEWAY_CALLBACK_URL", &self.gateway_callback_url),
            ("ONRAMP_BASE_URL", &self.onramp_base_url),
        ] {
            url::Url::parse(value).map_err(|_| {
                AppError::InvalidRequest(format!("{} is not a valid URL: {}", name, value))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://localhost/jiranipay".to_string(),
            server_port: 3000,
            gateway_base_url: "https://api.gateway.example".to_string(),
            gateway_secret_key: "sk_test_abc".to_string(),
            gateway_webhook_secret: "whsec_abc".to_string(),
            gateway_callback_url: "https://shop.example/payments/callback".to_string(),
            onramp_base_url: "https://staging.onramp.example".to_string(),
            onramp_api_key: "key".to_string(),
            onramp_api_secret: "secret".to_string(),
            onramp_webhook_secret: "hooksecret".to_string(),
            onramp_settlement_wallet: "0xabc123".to_string(),
            onramp_environment: ProcessorEnvironment::Staging,
        }
    }

    #[test]
    fn valid_urls_pass_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = base_config();
        config.gateway_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_defaults_to_staging() {
        assert_eq!(
            ProcessorEnvironment::default(),
            ProcessorEnvironment::Staging
        );
    }
}
