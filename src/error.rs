//! Error types for the Redeban KYC gateway.
//!
//! All failures that cross a component boundary are expressed through the
//! closed [`KycError`] taxonomy. Callers never see a bare transport error:
//! every variant maps to a stable HTTP status code and an envelope error
//! type via [`KycError::status_code`] and [`KycError::kind`].
//!
//! # Error Categories
//!
//! - **Validation** ([`KycError::Validation`]): bad input, rejected before
//!   any network traffic
//! - **Credential errors** ([`KycError::SecretUnavailable`],
//!   [`KycError::CredentialIssuanceFailed`]): certificate bundle or bearer
//!   token could not be obtained
//! - **Upstream errors** ([`KycError::UpstreamUnavailable`],
//!   [`KycError::UpstreamRejected`], [`KycError::RateLimited`]): the
//!   merchant API failed or refused the request
//!
//! # Examples
//!
//! ```
//! use redeban_kyc_gateway::error::{KycError, Result};
//!
//! fn check_id(raw: &str) -> Result<()> {
//!     if raw.len() != 8 {
//!         return Err(KycError::Validation("MerchantID must be exactly 8 numeric digits".to_owned()));
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(check_id("123").unwrap_err().status_code(), 400);
//! ```

use thiserror::Error;

/// Result type alias for gateway operations.
///
/// All fallible functions in this crate return this type. Results should be
/// handled by the caller - either checked, propagated with `?`, or converted
/// into a response envelope at the outermost layer.
pub type Result<T> = std::result::Result<T, KycError>;

/// Errors that can occur while serving a merchant lookup.
///
/// The taxonomy is closed by design: the routing layer renders every variant
/// into a well-formed error envelope and nothing else ever reaches callers.
///
/// # Error Recovery
///
/// - **Transient** ([`UpstreamUnavailable`](Self::UpstreamUnavailable)):
///   already retried internally up to the configured bound before surfacing
/// - **Validation** ([`Validation`](Self::Validation)): fix the input; never
///   retried and never triggers network calls
/// - **Credential** ([`SecretUnavailable`](Self::SecretUnavailable),
///   [`CredentialIssuanceFailed`](Self::CredentialIssuanceFailed)): check the
///   secret store and the token issuer
#[must_use = "errors should be handled, propagated, or rendered into a response envelope"]
#[derive(Debug, Error)]
pub enum KycError {
    /// Input validation rejected the request.
    ///
    /// Raised before any credential or upstream traffic. Always maps to 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// The certificate bundle could not be loaded from the secret store.
    ///
    /// Covers a missing secret, a malformed payload (bad JSON, bad base64,
    /// unparsable certificate or key), and secret-service unreachability
    /// after its own bounded retry. Fatal for every request that requires
    /// mutual TLS on this process.
    #[error("certificate bundle unavailable: {0}")]
    SecretUnavailable(String),

    /// The credential issuer could not provide a token.
    ///
    /// Carries the last HTTP status observed from the issuer, if any.
    /// Surfaced as 401 when the issuer rejected our credentials, otherwise
    /// as 502.
    #[error("credential issuance failed: {message}")]
    CredentialIssuanceFailed {
        /// Human-readable cause of the failure.
        message: String,
        /// Last HTTP status observed from the issuer, `None` for
        /// connection-level failures.
        status: Option<u16>,
    },

    /// The upstream API could not be reached after exhausting retries.
    ///
    /// Covers connection failures, timeouts, and 5xx responses. Maps to 504
    /// when the last failure was a timeout, otherwise 502.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Last observed cause, including the HTTP status when one was seen.
        message: String,
        /// Whether the last attempt failed by exceeding its deadline.
        timed_out: bool,
    },

    /// The upstream API rejected the request with a client error.
    ///
    /// 4xx responses other than 429 are terminal by definition and passed
    /// through with their original status code.
    #[error("upstream rejected request ({status}): {message}")]
    UpstreamRejected {
        /// HTTP status returned by the upstream API.
        status: u16,
        /// Error detail extracted from the upstream response.
        message: String,
    },

    /// The upstream API returned 429.
    ///
    /// Not retried by this layer; backing off is the caller's responsibility.
    #[error("rate limit exceeded, retry later")]
    RateLimited,

    /// Unexpected or unmapped failure.
    ///
    /// Includes upstream payloads of unexpected shape and configuration
    /// errors. Always maps to 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KycError {
    /// HTTP status code this error maps to at the API boundary.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::SecretUnavailable(_) | Self::Internal(_) => 500,
            Self::CredentialIssuanceFailed { status, .. } => match status {
                Some(401 | 403) => 401,
                _ => 502,
            },
            Self::UpstreamUnavailable { timed_out, .. } => {
                if *timed_out { 504 } else { 502 }
            }
            Self::UpstreamRejected { status, .. } => *status,
            Self::RateLimited => 429,
        }
    }

    /// Stable machine-readable error type for the response envelope.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SecretUnavailable(_) => "SECRET_UNAVAILABLE",
            Self::CredentialIssuanceFailed { .. } => "CREDENTIAL_ISSUANCE_FAILED",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            Self::RateLimited => "RATE_LIMIT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
