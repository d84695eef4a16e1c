//! Token acquisition: cache lookup, issuance, and stampede-safe install.
//!
//! Issuance is assumed to have side effects and rate limits on the issuer,
//! so minimizing redundant issuance under concurrent cold starts is a
//! correctness goal, not an optimization. Concurrent refreshers race on the
//! store's conditional write; the losers discard their freshly obtained
//! token and return the winner's.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{KycError, Result};
use crate::reliability::{RetryPolicy, retry_with_backoff};
use crate::token::cache::{CachedToken, TokenStore};

/// A token freshly obtained from the credential issuer.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The bearer token value.
    pub token: String,
    /// Absolute expiry derived from the issuer's response.
    pub expires_at: DateTime<Utc>,
}

/// External credential-issuing capability.
///
/// Invoked as an opaque call returning a token and its expiry. Transient
/// failures are retryable; malformed responses are not.
pub trait CredentialIssuer: Send + Sync {
    /// Requests a new token from the issuer.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::CredentialIssuanceFailed`] carrying the observed
    /// HTTP status, or `status: None` for connection-level failures.
    fn issue(&self) -> impl Future<Output = Result<IssuedToken>> + Send;
}

#[derive(Debug, Deserialize)]
struct IssuerResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
}

/// Credential issuer reached over HTTPS.
///
/// POSTs an empty JSON object to the issuer URL and accepts either
/// `{token | access_token, expires_in | expires_at}` in the response.
#[derive(Debug, Clone)]
pub struct HttpCredentialIssuer {
    http: reqwest::Client,
    token_url: String,
}

impl HttpCredentialIssuer {
    /// Creates an issuer client for the given token endpoint.
    pub fn new(http: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self { http, token_url: token_url.into() }
    }
}

impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self) -> Result<IssuedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| KycError::CredentialIssuanceFailed {
                message: format!("issuer request failed: {e}"),
                status: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KycError::CredentialIssuanceFailed {
                message: format!("issuer returned {status}"),
                status: Some(status.as_u16()),
            });
        }

        let body: IssuerResponse =
            response.json().await.map_err(|e| KycError::CredentialIssuanceFailed {
                message: format!("issuer response is not valid JSON: {e}"),
                status: Some(status.as_u16()),
            })?;

        let token = body.token.or(body.access_token).filter(|t| !t.is_empty()).ok_or_else(|| {
            KycError::CredentialIssuanceFailed {
                message: "issuer response missing token value".to_owned(),
                status: Some(status.as_u16()),
            }
        })?;

        let expires_at = match (body.expires_at, body.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => Utc::now() + Duration::seconds(secs),
            (None, None) => {
                return Err(KycError::CredentialIssuanceFailed {
                    message: "issuer response missing expires_in/expires_at".to_owned(),
                    status: Some(status.as_u16()),
                });
            }
        };

        Ok(IssuedToken { token, expires_at })
    }
}

/// Orchestrates cache lookup and stampede-safe refresh.
///
/// Per-request state machine: a fresh cached token is returned without any
/// network call; otherwise the issuer is invoked with bounded retry, the
/// result is installed via the store's conditional write, and on a lost
/// race the winner's token is returned instead.
#[derive(Debug)]
pub struct TokenProvider<S, I> {
    store: S,
    issuer: I,
    cache_key: String,
    safety_margin: Duration,
    retry: RetryPolicy,
}

impl<S: TokenStore, I: CredentialIssuer> TokenProvider<S, I> {
    /// Creates a provider over the given store and issuer.
    pub fn new(
        store: S,
        issuer: I,
        cache_key: impl Into<String>,
        safety_margin: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, issuer, cache_key: cache_key.into(), safety_margin, retry }
    }

    /// The store this provider coordinates through.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a valid token, refreshing through the issuer on cache miss or
    /// expiry.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::CredentialIssuanceFailed`] when the issuer
    /// exhausts its retries, carrying the last observed status.
    #[instrument(skip(self))]
    pub async fn get_token(&self) -> Result<CachedToken> {
        let now = Utc::now();

        if let Some(cached) = self.store.get(&self.cache_key).await? {
            if cached.is_fresh(now, self.safety_margin) {
                debug!(expires_at = %cached.expires_at, "reusing cached token");
                return Ok(cached);
            }
            debug!(expires_at = %cached.expires_at, "cached token expired or inside safety margin");
        } else {
            debug!("no cached token found");
        }

        self.refresh(now).await
    }

    /// Invalidates the cached token and obtains a fresh one.
    ///
    /// Used exactly once per request when the upstream API returns 401 for a
    /// token the cache still considered valid.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> Result<CachedToken> {
        warn!(key = %self.cache_key, "invalidating cached token and forcing refresh");
        self.store.invalidate(&self.cache_key).await?;
        self.refresh(Utc::now()).await
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let issued = retry_with_backoff(&self.retry, || self.issuer.issue()).await?;

        let candidate = CachedToken {
            key: self.cache_key.clone(),
            value: issued.token,
            issued_at: now,
            expires_at: issued.expires_at,
        };

        if self
            .store
            .put_if_absent_or_expired(&candidate, now, self.safety_margin)
            .await?
        {
            info!(expires_at = %candidate.expires_at, "installed refreshed token");
            return Ok(candidate);
        }

        // Lost the race: another writer installed a still-valid token
        // between our read and our write. Converge on the winner so all
        // concurrent callers observe one issued token per refresh window.
        match self.store.get(&self.cache_key).await? {
            Some(winner) if winner.is_fresh(Utc::now(), self.safety_margin) => {
                info!("lost refresh race, converging on winning token");
                Ok(winner)
            }
            // Winner vanished between our write and our read; our token is
            // still perfectly usable for this request.
            _ => Ok(candidate),
        }
    }
}
