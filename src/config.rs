//! Configuration loading.
//!
//! Credentials come from the environment only. Tunables come from an
//! optional TOML file named by `TASTY_AGENT_CONFIG`; every section and key
//! in it is optional and falls back to the defaults below.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "TASTYTRADE_CLIENT_SECRET";
/// Long-lived refresh token.
pub const ENV_REFRESH_TOKEN: &str = "TASTYTRADE_REFRESH_TOKEN";
/// Account to trade; the first account on the login when absent.
pub const ENV_ACCOUNT_ID: &str = "TASTYTRADE_ACCOUNT_ID";
/// Model identifier handed to downstream AI features.
pub const ENV_MODEL_IDENTIFIER: &str = "MODEL_IDENTIFIER";
/// Log verbosity, used when `RUST_LOG` is unset.
pub const ENV_LOG_LEVEL: &str = "TASTY_AGENT_LOG";
/// Path of the optional TOML settings file.
pub const ENV_CONFIG_PATH: &str = "TASTY_AGENT_CONFIG";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// A required environment variable is unset or empty.
    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// OAuth credentials used to mint access tokens.
#[derive(Clone)]
pub struct Credentials {
    /// OAuth client secret.
    pub client_secret: String,
    /// Refresh token. Never expires and is never rotated.
    pub refresh_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Root configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth credentials.
    pub credentials: Credentials,
    /// Account to use instead of the first one on the login.
    pub account_id: Option<String>,
    /// Model identifier for downstream features; unused by the core.
    pub model_identifier: Option<String>,
    /// Default log filter.
    pub log_level: String,
    /// Tunables.
    pub settings: Settings,
}

/// Tunables read from the TOML settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Brokerage API endpoint.
    pub api: ApiConfig,
    /// Session lifetime.
    pub session: SessionConfig,
    /// Outbound call admission.
    pub rate_limit: RateLimitConfig,
    /// Cache lifetimes.
    pub cache: CacheConfig,
    /// Streaming collection.
    pub streaming: StreamingConfig,
    /// Order pricing.
    pub pricing: PricingConfig,
}

/// Brokerage API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the REST API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: tastytrade_client::PRODUCTION_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Access token lifetime in seconds.
    pub lifetime_secs: u64,
    /// Tokens this close to expiry are refreshed before use, in seconds.
    pub safety_margin_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: 900,
            safety_margin_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Access token lifetime.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    /// Safety margin before expiry.
    #[must_use]
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }
}

/// Rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Permits per window.
    pub capacity: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            window_ms: 1000,
        }
    }
}

impl RateLimitConfig {
    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Option chain lifetime in seconds.
    pub chain_ttl_secs: u64,
    /// Streaming credential lifetime in seconds.
    pub quote_token_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chain_ttl_secs: 24 * 60 * 60,
            quote_token_ttl_secs: 23 * 60 * 60,
        }
    }
}

impl CacheConfig {
    /// Option chain lifetime.
    #[must_use]
    pub fn chain_ttl(&self) -> Duration {
        Duration::from_secs(self.chain_ttl_secs)
    }

    /// Streaming credential lifetime.
    #[must_use]
    pub fn quote_token_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_token_ttl_secs)
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Default collection deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl StreamingConfig {
    /// Default collection deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pricing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Minimum price increment net prices are rounded to.
    pub tick: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tick: Decimal::new(1, 2),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the settings file.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses settings from a TOML string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed or is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings values.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "api.base_url cannot be empty".to_string(),
            ));
        }
        if self.session.lifetime_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "session.lifetime_secs must be positive".to_string(),
            ));
        }
        if self.session.safety_margin_secs >= self.session.lifetime_secs {
            return Err(ConfigError::InvalidValue(format!(
                "session.safety_margin_secs ({}) must be smaller than lifetime_secs ({})",
                self.session.safety_margin_secs, self.session.lifetime_secs
            )));
        }
        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.capacity must be positive".to_string(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_ms must be positive".to_string(),
            ));
        }
        if self.pricing.tick <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue(
                "pricing.tick must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if a credential is missing or the settings file is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through a variable lookup function.
    ///
    /// # Errors
    /// Returns error if a credential is missing or the settings file is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let client_secret = var(ENV_CLIENT_SECRET).ok_or(ConfigError::MissingVar(ENV_CLIENT_SECRET))?;
        let refresh_token = var(ENV_REFRESH_TOKEN).ok_or(ConfigError::MissingVar(ENV_REFRESH_TOKEN))?;

        let settings = match var(ENV_CONFIG_PATH) {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        Ok(Self {
            credentials: Credentials {
                client_secret,
                refresh_token,
            },
            account_id: var(ENV_ACCOUNT_ID),
            model_identifier: var(ENV_MODEL_IDENTIFIER),
            log_level: var(ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string()),
            settings,
        })
    }

    /// Builds a configuration from explicit parts.
    #[must_use]
    pub fn new(credentials: Credentials, settings: Settings) -> Self {
        Self {
            credentials,
            account_id: None,
            model_identifier: None,
            log_level: "info".to_string(),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.api.base_url, "https://api.tastyworks.com");
        assert_eq!(settings.api.timeout(), Duration::from_secs(30));
        assert_eq!(settings.session.lifetime(), Duration::from_secs(900));
        assert_eq!(settings.session.safety_margin(), Duration::from_secs(60));
        assert_eq!(settings.rate_limit.capacity, 5);
        assert_eq!(settings.rate_limit.window(), Duration::from_secs(1));
        assert_eq!(settings.cache.chain_ttl(), Duration::from_secs(86_400));
        assert_eq!(settings.cache.quote_token_ttl(), Duration::from_secs(82_800));
        assert_eq!(settings.streaming.timeout(), Duration::from_secs(10));
        assert_eq!(settings.pricing.tick, dec!(0.01));
    }

    #[test]
    fn test_parse_partial_settings() {
        let toml_content = r#"
[api]
base_url = "https://api.cert.tastyworks.com"

[rate_limit]
capacity = 2

[pricing]
tick = "0.05"
"#;

        let settings = Settings::parse(toml_content).expect("should parse");
        assert_eq!(settings.api.base_url, "https://api.cert.tastyworks.com");
        assert_eq!(settings.api.timeout_secs, 30);
        assert_eq!(settings.rate_limit.capacity, 2);
        assert_eq!(settings.rate_limit.window_ms, 1000);
        assert_eq!(settings.pricing.tick, dec!(0.05));
        assert_eq!(settings.session.lifetime_secs, 900);
    }

    #[test]
    fn test_parse_empty_settings() {
        let settings = Settings::parse("").expect("should parse");
        assert_eq!(settings.streaming.timeout_ms, 10_000);
    }

    #[test]
    fn test_validation_zero_capacity() {
        let result = Settings::parse("[rate_limit]\ncapacity = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_validation_margin_not_below_lifetime() {
        let result = Settings::parse("[session]\nlifetime_secs = 60\nsafety_margin_secs = 60\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_validation_non_positive_tick() {
        let result = Settings::parse("[pricing]\ntick = \"0\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_parse_rejects_malformed_toml() {
        let result = Settings::parse("[rate_limit\ncapacity = 2");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_lookup_reads_credentials() {
        let config = Config::from_lookup(lookup(&[
            (ENV_CLIENT_SECRET, "secret"),
            (ENV_REFRESH_TOKEN, "refresh"),
            (ENV_ACCOUNT_ID, "5WT00001"),
            (ENV_LOG_LEVEL, "debug"),
        ]))
        .expect("should load");

        assert_eq!(config.credentials.client_secret, "secret");
        assert_eq!(config.credentials.refresh_token, "refresh");
        assert_eq!(config.account_id.as_deref(), Some("5WT00001"));
        assert_eq!(config.model_identifier, None);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_from_lookup_missing_refresh_token() {
        let result = Config::from_lookup(lookup(&[(ENV_CLIENT_SECRET, "secret")]));
        assert!(matches!(
            result,
            Err(ConfigError::MissingVar(ENV_REFRESH_TOKEN))
        ));
    }

    #[test]
    fn test_from_lookup_blank_secret_is_missing() {
        let result = Config::from_lookup(lookup(&[
            (ENV_CLIENT_SECRET, "   "),
            (ENV_REFRESH_TOKEN, "refresh"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::MissingVar(ENV_CLIENT_SECRET))
        ));
    }

    #[test]
    fn test_from_lookup_missing_settings_file() {
        let result = Config::from_lookup(lookup(&[
            (ENV_CLIENT_SECRET, "secret"),
            (ENV_REFRESH_TOKEN, "refresh"),
            (ENV_CONFIG_PATH, "/nonexistent/tasty-agent.toml"),
        ]));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let credentials = Credentials {
            client_secret: "cs-123".to_string(),
            refresh_token: "rt-456".to_string(),
        };

        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("cs-123"));
        assert!(!debug.contains("rt-456"));
    }
}
