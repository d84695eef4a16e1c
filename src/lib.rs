//! Redeban KYC Gateway: Resilient Merchant Lookup over Mutual TLS
//!
//! A Rust library that looks up Colombian merchants in the Redeban KYC
//! (Know-Your-Customer) API, handling the full credential lifecycle so
//! callers never touch certificates or bearer tokens directly.
//!
//! # What does it do?
//!
//! One call to [`Gateway::lookup`] hides three layers of plumbing:
//!
//! - **Mutual TLS**: the client certificate and private key are fetched from
//!   a secret store once per process and presented on every upstream call
//! - **Token lifecycle**: bearer tokens are cached with explicit expiry, a
//!   safety margin, and stampede-safe refresh through a conditional write
//! - **Bounded resilience**: transient upstream failures are retried with
//!   exponential backoff and jitter inside a total elapsed budget
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │     Caller       │  HTTP handler, job, or CLI
//! └────────┬─────────┘
//!          │ lookup(merchant_id)
//! ┌────────▼─────────────────────────────────────────┐
//! │            Gateway (this crate)                  │
//! │  ┌───────────────┐      ┌────────────────────┐   │
//! │  │ TokenProvider │      │ CertificateStore   │   │
//! │  │ (cache + CAS  │      │ (secret fetch,     │   │
//! │  │  refresh)     │      │  once per process) │   │
//! │  └───────┬───────┘      └─────────┬──────────┘   │
//! │          │ bearer token           │ TLS identity │
//! │  ┌───────▼────────────────────────▼──────────┐   │
//! │  │     UpstreamClient (retry + backoff)      │   │
//! │  └───────────────────┬───────────────────────┘   │
//! └──────────────────────┼───────────────────────────┘
//!                        │ HTTPS + client certificate
//!               ┌────────▼─────────┐
//!               │  Redeban KYC API │
//!               └──────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use redeban_kyc_gateway::Gateway;
//!
//! # async fn example() -> redeban_kyc_gateway::error::Result<()> {
//! // Reads SECRET_STORE_URL, TOKEN_ISSUER_URL, and the REDEBAN_* variables.
//! let gateway = Gateway::from_env()?;
//!
//! // Envelope form: validation errors, credential failures, and upstream
//! // errors all come back as a well-formed error envelope.
//! let response = gateway.lookup_response("10203040", false).await;
//! println!("{}", serde_json::to_string_pretty(&response).unwrap());
//! # Ok(())
//! # }
//! ```
//!
//! A rejected token (upstream 401) is resolved transparently: the cached
//! token is invalidated, one fresh token is obtained, and the request is
//! retried exactly once before the failure is surfaced.

pub mod config;
pub mod error;
pub mod normalize;
pub mod reliability;
pub mod response;
pub mod secrets;
pub mod token;
pub mod upstream;

use tokio::sync::OnceCell;
use tracing::{info, instrument};

pub use crate::config::GatewayConfig;
pub use crate::error::{KycError, Result};
pub use crate::normalize::{CanonicalResult, MerchantId, MerchantQuery};
pub use crate::response::ApiResponse;

use crate::normalize::normalize;
use crate::secrets::{CertificateStore, HttpSecretFetcher, SecretFetcher};
use crate::token::{CredentialIssuer, HttpCredentialIssuer, MemoryTokenStore, TokenProvider, TokenStore};
use crate::upstream::{HealthStatus, UpstreamClient};

/// Entry point tying the credential lifecycle to the upstream client.
///
/// Generic over the secret fetcher, token store, and credential issuer so
/// deployments can swap backends; [`Gateway::from_env`] wires up the HTTP
/// implementations used in production.
#[derive(Debug)]
pub struct Gateway<F, S, I> {
    config: GatewayConfig,
    certificates: CertificateStore<F>,
    tokens: TokenProvider<S, I>,
    upstream: OnceCell<UpstreamClient>,
}

impl Gateway<HttpSecretFetcher, MemoryTokenStore, HttpCredentialIssuer> {
    /// Builds a gateway from environment configuration with the HTTP secret
    /// fetcher, the in-process token store, and the HTTP credential issuer.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::Internal`] when configuration is missing or
    /// invalid, or when the HTTP client cannot be constructed.
    pub fn from_env() -> Result<Self> {
        let config = GatewayConfig::from_env()?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| KycError::Internal(format!("failed to build HTTP client: {e}")))?;

        let fetcher = HttpSecretFetcher::new(
            http.clone(),
            config.secret_url.clone(),
            config.secret_auth_token.clone(),
        );
        let issuer = HttpCredentialIssuer::new(http, config.token_url.clone());

        Ok(Self::new(config, fetcher, MemoryTokenStore::new(), issuer))
    }
}

impl<F: SecretFetcher, S: TokenStore, I: CredentialIssuer> Gateway<F, S, I> {
    /// Creates a gateway over explicit backends.
    pub fn new(config: GatewayConfig, fetcher: F, store: S, issuer: I) -> Self {
        let safety_margin =
            chrono::Duration::seconds(i64::try_from(config.safety_margin.as_secs()).unwrap_or(i64::MAX));
        let tokens = TokenProvider::new(
            store,
            issuer,
            config.token_cache_key.clone(),
            safety_margin,
            config.retry_policy(),
        );

        Self {
            certificates: CertificateStore::new(fetcher),
            tokens,
            upstream: OnceCell::new(),
            config,
        }
    }

    /// The configuration this gateway was built with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Builds the upstream client on first use and memoizes it.
    ///
    /// The certificate bundle is only loaded when the configuration demands
    /// a client identity, so a failed secret load never blocks endpoints
    /// that do not require mutual TLS.
    async fn upstream(&self) -> Result<&UpstreamClient> {
        self.upstream
            .get_or_try_init(|| async {
                let bundle = if self.config.use_client_identity {
                    Some(self.certificates.load().await?)
                } else {
                    None
                };
                UpstreamClient::new(&self.config, bundle.as_deref())
            })
            .await
    }

    /// Looks up a merchant and returns the canonical result.
    ///
    /// Resolves a rejected token (upstream 401) with one forced refresh and
    /// one retry; a second 401 surfaces as
    /// [`KycError::UpstreamRejected`]. A 403 is terminal immediately, it
    /// indicates a permission problem no fresh token can fix.
    ///
    /// # Errors
    ///
    /// Any [`KycError`] variant except [`KycError::Validation`], which is
    /// impossible once a [`MerchantQuery`] exists.
    #[instrument(skip(self, query), fields(merchant_id = %query.merchant_id))]
    pub async fn lookup(&self, query: &MerchantQuery) -> Result<CanonicalResult> {
        let upstream = self.upstream().await?;
        let token = self.tokens.get_token().await?;

        let raw = match upstream.fetch_commerce(&query.merchant_id, &token.value).await {
            Ok(raw) => raw,
            Err(KycError::UpstreamRejected { status: 401, .. }) => {
                info!("upstream rejected token, forcing refresh and retrying once");
                let fresh = self.tokens.force_refresh().await?;
                upstream.fetch_commerce(&query.merchant_id, &fresh.value).await?
            }
            Err(e) => return Err(e),
        };

        normalize(raw, query)
    }

    /// Validates the raw identifier, performs the lookup, and wraps the
    /// outcome in a response envelope.
    ///
    /// Validation failures short-circuit before any credential or upstream
    /// traffic.
    pub async fn lookup_response(
        &self,
        raw_merchant_id: &str,
        include_raw_data: bool,
    ) -> ApiResponse<CanonicalResult> {
        let query = match MerchantQuery::new(raw_merchant_id, include_raw_data) {
            Ok(query) => query,
            Err(e) => return ApiResponse::failure(&e),
        };

        match self.lookup(&query).await {
            Ok(result) => ApiResponse::success(result),
            Err(e) => ApiResponse::failure(&e),
        }
    }

    /// Probes upstream reachability without authentication.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::SecretUnavailable`] when the client identity is
    /// required but cannot be loaded.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        Ok(self.upstream().await?.health_check().await)
    }
}
