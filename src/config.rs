//! Gateway configuration.
//!
//! Configuration is read from environment variables with the same names and
//! defaults the deployment uses. [`GatewayConfig::validate`] enforces the
//! security constraints on every externally supplied URL before any client
//! is built.

use std::time::Duration;

use url::Url;

use crate::error::{KycError, Result};
use crate::reliability::RetryPolicy;

/// Runtime configuration for the gateway.
///
/// Construct via [`GatewayConfig::from_env`] in production or with a struct
/// literal over [`GatewayConfig::default`] in tests.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the Redeban KYC API (`REDEBAN_BASE_URL`).
    pub base_url: String,
    /// API path prefix under the base URL (`REDEBAN_API_PATH`).
    pub api_path: String,
    /// Per-attempt request timeout (`REDEBAN_TIMEOUT`, seconds).
    pub request_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum upstream attempts per request (`REDEBAN_MAX_RETRIES`).
    pub max_attempts: u32,
    /// Total elapsed budget for one request including retries and backoff
    /// (`REDEBAN_MAX_ELAPSED`, seconds). Must fit inside the caller's own
    /// deadline.
    pub max_elapsed: Duration,
    /// URL of the secret store entry holding the certificate bundle
    /// (`SECRET_STORE_URL`).
    pub secret_url: String,
    /// Optional bearer token for the secret store (`SECRET_STORE_TOKEN`).
    pub secret_auth_token: Option<String>,
    /// URL of the credential-issuing service (`TOKEN_ISSUER_URL`).
    pub token_url: String,
    /// Cache key under which the bearer token is stored
    /// (`TOKEN_CACHE_KEY`).
    pub token_cache_key: String,
    /// Safety margin subtracted from a token's stated expiry
    /// (`TOKEN_SAFETY_MARGIN`, seconds).
    pub safety_margin: Duration,
    /// Whether to present a client certificate to the upstream API.
    /// Disabled only for endpoints that do not require mutual TLS.
    pub use_client_identity: bool,
    /// User-Agent header sent on every outbound request.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.qa.sandboxhubredeban.com:9445".to_owned(),
            api_path: "/rbmcalidad/calidad/api/kyc/v3.0.0/enterprise".to_owned(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            max_elapsed: Duration::from_secs(60),
            secret_url: String::new(),
            secret_auth_token: None,
            token_url: String::new(),
            token_cache_key: "redeban/api-token".to_owned(),
            safety_margin: Duration::from_secs(30),
            use_client_identity: true,
            user_agent: "RedebanKYC-Gateway/1.0".to_owned(),
        }
    }
}

impl GatewayConfig {
    /// Reads configuration from the environment and validates it.
    ///
    /// `SECRET_STORE_URL` and `TOKEN_ISSUER_URL` are required; everything
    /// else falls back to the defaults above.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::Internal`] when a required variable is missing,
    /// a numeric variable does not parse, or validation fails.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            base_url: env_or("REDEBAN_BASE_URL", &defaults.base_url),
            api_path: env_or("REDEBAN_API_PATH", &defaults.api_path),
            request_timeout: Duration::from_secs(env_parse("REDEBAN_TIMEOUT", 30)?),
            connect_timeout: defaults.connect_timeout,
            max_attempts: env_parse("REDEBAN_MAX_RETRIES", 3)?,
            max_elapsed: Duration::from_secs(env_parse("REDEBAN_MAX_ELAPSED", 60)?),
            secret_url: env_required("SECRET_STORE_URL")?,
            secret_auth_token: std::env::var("SECRET_STORE_TOKEN").ok(),
            token_url: env_required("TOKEN_ISSUER_URL")?,
            token_cache_key: env_or("TOKEN_CACHE_KEY", &defaults.token_cache_key),
            safety_margin: Duration::from_secs(env_parse("TOKEN_SAFETY_MARGIN", 30)?),
            use_client_identity: true,
            user_agent: defaults.user_agent,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for security issues.
    ///
    /// Checks that every outbound URL uses HTTPS and does not point at a
    /// loopback address, and that the retry bounds are sane.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::Internal`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        validate_https_url("REDEBAN_BASE_URL", &self.base_url)?;
        validate_https_url("SECRET_STORE_URL", &self.secret_url)?;
        validate_https_url("TOKEN_ISSUER_URL", &self.token_url)?;

        if self.max_attempts == 0 {
            return Err(KycError::Internal("REDEBAN_MAX_RETRIES must be at least 1".to_owned()));
        }
        if self.request_timeout > self.max_elapsed {
            return Err(KycError::Internal(
                "REDEBAN_TIMEOUT must fit inside REDEBAN_MAX_ELAPSED".to_owned(),
            ));
        }
        Ok(())
    }

    /// Retry policy derived from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed,
            ..RetryPolicy::default()
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_required(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| KycError::Internal(format!("required environment variable {name} is not set")))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| KycError::Internal(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn validate_https_url(name: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| KycError::Internal(format!("invalid {name} '{raw}': {e}")))?;

    if url.scheme() != "https" {
        return Err(KycError::Internal(format!(
            "{name} must use HTTPS, got: {}",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        if host == "localhost" || host.starts_with("127.") || host == "::1" || host == "[::1]" {
            return Err(KycError::Internal(format!(
                "{name} must not be localhost or loopback: {host}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        GatewayConfig {
            secret_url: "https://secrets.example.com/redeban".to_owned(),
            token_url: "https://issuer.example.com/token".to_owned(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_default_config_matches_deployment_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.base_url, "https://api.qa.sandboxhubredeban.com:9445");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.safety_margin, Duration::from_secs(30));
        assert!(config.use_client_identity);
    }

    #[test]
    fn test_validate_accepts_https_urls() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_base_url() {
        let config = GatewayConfig {
            base_url: "http://api.example.com".to_owned(),
            ..valid_config()
        };
        assert!(matches!(config.validate().unwrap_err(), KycError::Internal(_)));
    }

    #[test]
    fn test_validate_rejects_loopback_issuer() {
        let config = GatewayConfig {
            token_url: "https://127.0.0.1/token".to_owned(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = GatewayConfig { max_attempts: 0, ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_exceeding_budget() {
        let config = GatewayConfig {
            request_timeout: Duration::from_secs(120),
            max_elapsed: Duration::from_secs(60),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_carries_bounds() {
        let config = GatewayConfig { max_attempts: 5, ..valid_config() };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_elapsed, config.max_elapsed);
    }
}
