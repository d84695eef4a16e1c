//! Production reliability patterns.
//!
//! Retry with exponential backoff, bounded jitter, and a total elapsed-time
//! budget. Every outbound call in the gateway (secret fetch, token issuance,
//! upstream lookup) goes through these primitives.

pub mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
