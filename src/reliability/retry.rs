//! Exponential backoff retry logic for transient failures.
//!
//! Backoff grows exponentially per attempt, capped at a maximum delay, with
//! bounded additive jitter so concurrent cold starts do not hammer the same
//! upstream in lockstep. A total elapsed budget bounds the whole loop: when
//! the remaining budget cannot fit the next sleep, the loop stops early and
//! surfaces the last error.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{KycError, Result};

/// Configuration for retry behavior.
///
/// The deterministic delay for attempt `n` is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`. Jitter adds
/// up to `jitter_ratio` of the deterministic delay on top; with the default
/// multiplier of 2.0 and ratio of 0.5 the jittered delays are still
/// non-decreasing across attempts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use redeban_kyc_gateway::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 500ms initial delay, 10s max delay
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
///
/// // Tighter budget for a latency-sensitive path
/// let tight = RetryPolicy {
///     max_attempts: 2,
///     max_elapsed: Duration::from_secs(5),
///     ..RetryPolicy::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 500ms).
    pub initial_delay: Duration,
    /// Upper bound on a single backoff delay (default: 10s).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Fraction of the deterministic delay added as random jitter
    /// (default: 0.5).
    pub jitter_ratio: f64,
    /// Total elapsed budget for all attempts and sleeps (default: 60s).
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.5,
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Deterministic backoff delay for a specific attempt, before jitter.
    ///
    /// `attempt` is zero-based: the delay slept before retry `n + 1`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(
            clippy::cast_precision_loss,
            reason = "acceptable for duration calculations"
        )]
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "delay_ms is positive and capped below by max_delay"
        )]
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Backoff delay for an attempt with bounded random jitter added.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "jitter bound is positive and well below u64::MAX"
        )]
        let jitter_cap = (base.as_millis() as f64 * self.jitter_ratio) as u64;
        if jitter_cap == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }

    /// Whether the remaining budget allows sleeping `delay` and attempting
    /// again.
    #[must_use]
    pub fn budget_allows(&self, elapsed: Duration, delay: Duration) -> bool {
        elapsed + delay < self.max_elapsed
    }
}

/// Determines if an error is worth retrying.
///
/// Transient transport failures and server-side errors may succeed on retry.
/// Validation errors, client-side rejections, rate limiting, and terminal
/// issuer rejections never do.
///
/// # Examples
///
/// ```
/// use redeban_kyc_gateway::{error::KycError, reliability::is_retryable};
///
/// let transient = KycError::UpstreamUnavailable {
///     message: "connect refused".to_owned(),
///     timed_out: false,
/// };
/// assert!(is_retryable(&transient));
///
/// let terminal = KycError::Validation("bad id".to_owned());
/// assert!(!is_retryable(&terminal));
/// ```
#[must_use]
pub fn is_retryable(error: &KycError) -> bool {
    match error {
        KycError::UpstreamUnavailable { .. } => true,
        // Issuer failures are retryable only for transport errors and 5xx;
        // a 4xx from the issuer will not change on retry.
        KycError::CredentialIssuanceFailed { status, .. } => {
            matches!(status, None | Some(500..=599))
        }
        KycError::Validation(_)
        | KycError::SecretUnavailable(_)
        | KycError::UpstreamRejected { .. }
        | KycError::RateLimited
        | KycError::Internal(_) => false,
    }
}

/// Executes an operation with exponential backoff retry.
///
/// Retries up to `policy.max_attempts` times while the error is retryable
/// per [`is_retryable`] and the elapsed budget allows another sleep.
/// Non-retryable errors are returned immediately.
///
/// # Errors
///
/// Returns the last error encountered when attempts or budget are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(error);
                }

                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "transient failure, will retry"
                );
                last_error = Some(error);

                if attempt + 1 < policy.max_attempts {
                    let delay = policy.jittered_delay(attempt);
                    if !policy.budget_allows(start.elapsed(), delay) {
                        tracing::warn!(
                            elapsed_ms = start.elapsed().as_millis(),
                            "elapsed budget exhausted, giving up early"
                        );
                        break;
                    }
                    tracing::debug!(delay_ms = delay.as_millis(), "sleeping before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| KycError::Internal("retry loop made no attempts".to_owned())))
}
