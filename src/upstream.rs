//! Resilient mutual-TLS client for the Redeban KYC API.
//!
//! Builds a pooled HTTPS transport from the certificate bundle, attaches the
//! bearer token, and executes idempotent GET calls with bounded retry.
//! Retries cover connection failures, timeouts, and 5xx responses; 4xx
//! responses are terminal at this layer (401 handling lives one level up,
//! where the token can be refreshed). Backoff is exponential with bounded
//! jitter, and the loop stops early once the remaining elapsed budget cannot
//! fit another attempt.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::error::{KycError, Result};
use crate::normalize::MerchantId;
use crate::reliability::RetryPolicy;
use crate::secrets::CertificateBundle;

/// HTTP client for the upstream KYC API.
///
/// Safe to reuse across sequential invocations on a warm process: the
/// underlying pool and the client identity are read-only after construction.
#[derive(Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_path: String,
    retry: RetryPolicy,
}

/// Outcome of an upstream health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `"healthy"` when the upstream answered 200, `"unhealthy"` otherwise.
    pub status: String,
    /// HTTP status observed, when a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Round-trip time of the probe in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Failure detail when no response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpstreamClient {
    /// Builds the client, presenting the certificate bundle as the TLS
    /// client identity when one is given.
    ///
    /// The bundle is required for the business API; `None` is only for
    /// endpoints that do not demand mutual TLS.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::SecretUnavailable`] when the bundle does not
    /// parse as a TLS identity, or [`KycError::Internal`] when the HTTP
    /// client cannot be constructed.
    pub fn new(config: &GatewayConfig, bundle: Option<&CertificateBundle>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10);

        if let Some(bundle) = bundle {
            let identity = reqwest::Identity::from_pem(&bundle.identity_pem()).map_err(|e| {
                KycError::SecretUnavailable(format!("certificate bundle is not a valid TLS identity: {e}"))
            })?;
            builder = builder.identity(identity);
        } else {
            warn!("building upstream client without a TLS client identity");
        }

        let http = builder
            .build()
            .map_err(|e| KycError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_path: config.api_path.clone(),
            retry: config.retry_policy(),
        })
    }

    fn commerce_url(&self, merchant_id: &MerchantId) -> String {
        format!("{}{}/Commerce/{}", self.base_url, self.api_path, merchant_id.as_str())
    }

    /// Fetches the raw commerce payload for a merchant.
    ///
    /// # Errors
    ///
    /// - [`KycError::UpstreamUnavailable`] after exhausting retries on
    ///   connection failures, timeouts, or 5xx
    /// - [`KycError::UpstreamRejected`] for terminal 4xx responses
    ///   (including 401, which the caller resolves with one forced token
    ///   refresh)
    /// - [`KycError::RateLimited`] for 429
    /// - [`KycError::Internal`] when a 200 body is not valid JSON
    #[instrument(skip(self, token), fields(merchant_id = %merchant_id))]
    pub async fn fetch_commerce(
        &self,
        merchant_id: &MerchantId,
        token: &str,
    ) -> Result<serde_json::Value> {
        let url = self.commerce_url(merchant_id);
        let start = Instant::now();
        let mut last_error: Option<KycError> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.jittered_delay(attempt - 1);
                if !self.retry.budget_allows(start.elapsed(), delay) {
                    warn!(
                        elapsed_ms = start.elapsed().as_millis(),
                        "elapsed budget cannot fit another attempt, giving up"
                    );
                    break;
                }
                debug!(delay_ms = delay.as_millis(), attempt = attempt + 1, "sleeping before retry");
                tokio::time::sleep(delay).await;
            }

            debug!(attempt = attempt + 1, max_attempts = self.retry.max_attempts, "calling upstream");

            let request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .header(reqwest::header::ACCEPT, "application/json");
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload = response.json().await.map_err(|e| {
                            KycError::Internal(format!("upstream response is not valid JSON: {e}"))
                        })?;
                        info!(attempt = attempt + 1, "upstream call succeeded");
                        return Ok(payload);
                    }

                    if status.is_server_error() {
                        warn!(status = status.as_u16(), attempt = attempt + 1, "upstream server error");
                        last_error = Some(KycError::UpstreamUnavailable {
                            message: format!("upstream returned {status}"),
                            timed_out: false,
                        });
                        continue;
                    }

                    // Client errors are terminal by definition.
                    let detail = response.text().await.unwrap_or_default();
                    return Err(classify_client_error(status.as_u16(), &detail, merchant_id));
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "upstream transport failure");
                    last_error = Some(KycError::UpstreamUnavailable {
                        message: format!("upstream request failed: {e}"),
                        timed_out: e.is_timeout(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| KycError::UpstreamUnavailable {
            message: "upstream call made no attempts".to_owned(),
            timed_out: false,
        }))
    }

    /// Probes the upstream base URL without authentication.
    ///
    /// Single attempt with the configured timeout; never retried.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/health", self.base_url);
        let start = Instant::now();

        match self.http.get(&url).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                HealthStatus {
                    status: if status_code == 200 { "healthy" } else { "unhealthy" }.to_owned(),
                    status_code: Some(status_code),
                    response_time_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
                    error: None,
                }
            }
            Err(e) => HealthStatus {
                status: "unhealthy".to_owned(),
                status_code: None,
                response_time_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn classify_client_error(status: u16, detail: &str, merchant_id: &MerchantId) -> KycError {
    let detail = truncate(detail, 200);
    match status {
        401 => KycError::UpstreamRejected {
            status,
            message: "authentication token invalid or expired".to_owned(),
        },
        403 => KycError::UpstreamRejected {
            status,
            message: "access forbidden: insufficient permissions".to_owned(),
        },
        404 => KycError::UpstreamRejected {
            status,
            message: format!("commerce not found: {}", merchant_id.as_str()),
        },
        429 => KycError::RateLimited,
        _ => KycError::UpstreamRejected {
            status,
            message: if detail.is_empty() {
                format!("upstream returned {status}")
            } else {
                detail
            },
        },
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_owned()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_owned()
    }
}
