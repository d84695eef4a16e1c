//! Response envelope rendered at the API boundary.
//!
//! Every outcome, success or failure, is wrapped in the same envelope so
//! callers can branch on `success` without inspecting HTTP status codes.
//! Each envelope carries a unique `response_id` for log correlation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::KycError;

/// Envelope format version.
const ENVELOPE_VERSION: &str = "1.0";

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the request produced a result.
    pub success: bool,
    /// The result payload, present only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error detail, present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Correlation metadata, always present.
    pub metadata: ResponseMetadata,
}

/// Machine-readable error detail inside a failure envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable error type, e.g. `VALIDATION_ERROR`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable description.
    pub message: String,
    /// HTTP status code the error maps to.
    pub code: u16,
}

/// Correlation metadata attached to every envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    /// When the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Unique identifier for this response, for log correlation.
    pub response_id: Uuid,
    /// Envelope format version.
    pub version: &'static str,
}

impl ResponseMetadata {
    fn new() -> Self {
        Self { timestamp: Utc::now(), response_id: Uuid::new_v4(), version: ENVELOPE_VERSION }
    }
}

impl<T> ApiResponse<T> {
    /// Wraps a successful result.
    #[must_use]
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, metadata: ResponseMetadata::new() }
    }

    /// Renders an error into a failure envelope.
    #[must_use]
    pub fn failure(error: &KycError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                error_type: error.kind().to_owned(),
                message: error.to_string(),
                code: error.status_code(),
            }),
            metadata: ResponseMetadata::new(),
        }
    }

    /// HTTP status code this envelope should be served with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match &self.error {
            Some(body) => body.code,
            None => 200,
        }
    }
}
