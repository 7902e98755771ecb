use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::time::Duration;

use crate::billing::validate_api_key;
use crate::error::ListwiseError;
use crate::utils::get_env_with_prefix;

/// Main configuration for the Listwise service
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    pub max_body_size: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Identity token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider.
    pub jwt_secret: Option<SecretString>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Stripe and checkout settings.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe_secret_key: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    /// Accept unsigned webhook payloads when no secret is configured.
    /// Only meant for the local Stripe CLI / emulator setups.
    pub allow_unsigned_webhooks: bool,
    pub signature_tolerance_secs: u64,
    /// Public origin of the web app, used for checkout and portal redirects.
    pub base_url: String,
    pub monthly_price_id: String,
    pub lifetime_price_id: String,
    /// Delay before the single re-check on the checkout return page.
    pub recheck_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            webhook_secret: None,
            allow_unsigned_webhooks: false,
            signature_tolerance_secs: default_signature_tolerance(),
            base_url: default_base_url(),
            monthly_price_id: default_monthly_price_id(),
            lifetime_price_id: default_lifetime_price_id(),
            recheck_delay_ms: default_recheck_delay_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_signature_tolerance() -> u64 {
    300
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_monthly_price_id() -> String {
    "price_premium_monthly".to_string()
}

fn default_lifetime_price_id() -> String {
    "price_premium_lifetime".to_string()
}

fn default_recheck_delay_ms() -> u64 {
    2000
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl BillingConfig {
    /// `base_url` without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }

    /// Webhooks may skip signature checks only with no secret and the emulator flag set.
    pub fn unsigned_webhooks_allowed(&self) -> bool {
        self.webhook_secret.is_none() && self.allow_unsigned_webhooks
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.jwt_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_stripe_secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.billing.stripe_secret_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.billing.webhook_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_unsigned_webhooks(mut self, allowed: bool) -> Self {
        self.config.billing.allow_unsigned_webhooks = allowed;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.billing.base_url = base_url.into();
        self
    }

    pub fn with_price_ids(mut self, monthly: impl Into<String>, lifetime: impl Into<String>) -> Self {
        self.config.billing.monthly_price_id = monthly.into();
        self.config.billing.lifetime_price_id = lifetime.into();
        self
    }

    pub fn with_recheck_delay_ms(mut self, ms: u64) -> Self {
        self.config.billing.recheck_delay_ms = ms;
        self
    }

    /// Load configuration from environment variables with LISTWISE_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = get_env_with_prefix("PORT") {
            if let Ok(p) = port.parse() {
                self.config.server.port = p;
            }
        }
        if let Some(max_body_size) = get_env_with_prefix("MAX_BODY_SIZE") {
            if let Ok(size) = max_body_size.parse() {
                self.config.server.max_body_size = size;
            }
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        if let Some(secret) = get_env_with_prefix("JWT_SECRET") {
            self.config.auth.jwt_secret = Some(SecretString::from(secret));
        }
        if let Some(issuer) = get_env_with_prefix("JWT_ISSUER") {
            self.config.auth.issuer = Some(issuer);
        }
        if let Some(audience) = get_env_with_prefix("JWT_AUDIENCE") {
            self.config.auth.audience = Some(audience);
        }

        if let Some(key) = get_env_with_prefix("STRIPE_SECRET_KEY") {
            self.config.billing.stripe_secret_key = Some(SecretString::from(key));
        }
        if let Some(secret) = get_env_with_prefix("STRIPE_WEBHOOK_SECRET") {
            self.config.billing.webhook_secret = Some(SecretString::from(secret));
        }
        if let Some(allow) = get_env_with_prefix("ALLOW_UNSIGNED_WEBHOOKS") {
            self.config.billing.allow_unsigned_webhooks = allow.parse().unwrap_or(false);
        }
        if let Some(tolerance) = get_env_with_prefix("WEBHOOK_TOLERANCE_SECS") {
            if let Ok(t) = tolerance.parse() {
                self.config.billing.signature_tolerance_secs = t;
            }
        }
        if let Some(base_url) = get_env_with_prefix("BASE_URL") {
            self.config.billing.base_url = base_url;
        }
        if let Some(price) = get_env_with_prefix("STRIPE_MONTHLY_PRICE_ID") {
            self.config.billing.monthly_price_id = price;
        }
        if let Some(price) = get_env_with_prefix("STRIPE_LIFETIME_PRICE_ID") {
            self.config.billing.lifetime_price_id = price;
        }
        if let Some(delay) = get_env_with_prefix("CHECKOUT_RECHECK_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.config.billing.recheck_delay_ms = ms;
            }
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration is invalid:
    /// - Invalid server address (host:port)
    /// - Invalid log level
    /// - Zero port or body size
    /// - `base_url` that is not an absolute http(s) URL
    /// - Malformed Stripe key, or a Stripe key without a webhook secret
    ///   outside of unsigned-webhook mode
    pub fn build(self) -> crate::error::Result<Config> {
        self.config.server.addr().map_err(|e| {
            ListwiseError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(ListwiseError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.server.port == 0 {
            return Err(ListwiseError::bad_request(
                "Server port must be greater than 0",
            ));
        }

        if self.config.server.max_body_size == 0 {
            return Err(ListwiseError::bad_request(
                "Maximum body size must be greater than 0",
            ));
        }

        let billing = &self.config.billing;
        match url::Url::parse(&billing.base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(ListwiseError::bad_request(format!(
                    "Invalid base URL: {}. Must be an absolute http(s) URL",
                    billing.base_url
                )));
            }
        }

        if let Some(key) = &billing.stripe_secret_key {
            validate_api_key(key.expose_secret())
                .map_err(|e| ListwiseError::bad_request(e.to_string()))?;

            if billing.webhook_secret.is_none() && !billing.allow_unsigned_webhooks {
                return Err(ListwiseError::bad_request(
                    "STRIPE_WEBHOOK_SECRET is required unless unsigned webhooks are allowed",
                ));
            }
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.billing.signature_tolerance_secs, 300);
        assert_eq!(config.billing.recheck_delay_ms, 2000);
        assert!(!config.billing.allow_unsigned_webhooks);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let result = ConfigBuilder::new().with_log_level("loud").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        assert!(ConfigBuilder::new().with_port(0).build().is_err());
    }

    #[test]
    fn test_relative_base_url_rejected() {
        assert!(ConfigBuilder::new().with_base_url("/settings").build().is_err());
        assert!(ConfigBuilder::new().with_base_url("ftp://example.com").build().is_err());
    }

    #[test]
    fn test_stripe_key_requires_webhook_secret() {
        let result = ConfigBuilder::new()
            .with_stripe_secret_key("sk_test_1234567890abcdefghij")
            .build();
        assert!(result.is_err());

        let config = ConfigBuilder::new()
            .with_stripe_secret_key("sk_test_1234567890abcdefghij")
            .with_webhook_secret("whsec_test")
            .build()
            .unwrap();
        assert!(!config.billing.unsigned_webhooks_allowed());

        let config = ConfigBuilder::new()
            .with_stripe_secret_key("sk_test_1234567890abcdefghij")
            .with_unsigned_webhooks(true)
            .build()
            .unwrap();
        assert!(config.billing.unsigned_webhooks_allowed());
    }

    #[test]
    fn test_malformed_stripe_key_rejected() {
        let result = ConfigBuilder::new()
            .with_stripe_secret_key("pk_test_1234567890abcdefghij")
            .with_webhook_secret("whsec_test")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ConfigBuilder::new()
            .with_base_url("https://listwise.app/")
            .build()
            .unwrap();
        assert_eq!(config.billing.base_url(), "https://listwise.app");
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = ConfigBuilder::new()
            .with_webhook_secret("whsec_super_secret")
            .build()
            .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("whsec_super_secret"));
    }
}
