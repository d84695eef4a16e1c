//! Input validation and upstream response normalization.
//!
//! The upstream payload is duck-typed JSON; this module maps it field by
//! field into the stable [`CanonicalResult`] shape with explicit defaulting,
//! so upstream field names never leak to callers. Merchant identifiers are
//! validated here, before any credential or upstream traffic.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{KycError, Result};

/// A validated merchant identifier: exactly 8 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MerchantId(String);

impl MerchantId {
    /// Parses and validates a raw merchant identifier.
    ///
    /// Surrounding whitespace is trimmed before validation, matching how
    /// identifiers arrive from path parameters.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::Validation`] unless the trimmed input is exactly
    /// 8 numeric digits.
    ///
    /// # Examples
    ///
    /// ```
    /// use redeban_kyc_gateway::normalize::MerchantId;
    ///
    /// assert!(MerchantId::parse("10203040").is_ok());
    /// assert!(MerchantId::parse("1020304").is_err());
    /// assert!(MerchantId::parse("1020304X").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(KycError::Validation(
                "MerchantID must be exactly 8 numeric digits".to_owned(),
            ))
        }
    }

    /// The validated identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated lookup request. Immutable after construction.
#[derive(Debug, Clone)]
pub struct MerchantQuery {
    /// The merchant to look up.
    pub merchant_id: MerchantId,
    /// Whether to echo the raw upstream payload in the result.
    pub include_raw_data: bool,
}

impl MerchantQuery {
    /// Validates the raw identifier and builds a query.
    ///
    /// # Errors
    ///
    /// Returns [`KycError::Validation`] for a malformed identifier.
    pub fn new(raw_id: &str, include_raw_data: bool) -> Result<Self> {
        Ok(Self { merchant_id: MerchantId::parse(raw_id)?, include_raw_data })
    }
}

/// Business attributes extracted from the upstream payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInfo {
    /// Registered business name, `"N/A"` when absent.
    pub name: String,
    /// Upstream status value, `"UNKNOWN"` when absent.
    pub status: String,
    /// Whether `status` equals `ACTIVE` (case-insensitive).
    pub is_active: bool,
    /// Registration date normalized to ISO-8601 when parsable; the raw
    /// upstream string is kept otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<String>,
    /// Legal document number, when present upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    /// Economic activity detail, when present upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub economic_activity: Option<Value>,
    /// Establishment detail, when present upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub establishment_info: Option<Value>,
}

/// The canonical merchant lookup result returned to callers.
///
/// Produced fresh per request; never cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    /// The merchant that was looked up.
    pub merchant_id: MerchantId,
    /// Normalized business attributes.
    pub business_info: BusinessInfo,
    /// Contact detail object, `{}` when absent upstream.
    pub contact_info: Value,
    /// The raw upstream payload, only when the query requested it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_upstream_payload: Option<Value>,
    /// When this result was produced.
    pub response_timestamp: DateTime<Utc>,
}

/// Maps the raw upstream payload into the canonical result.
///
/// # Errors
///
/// Returns [`KycError::Internal`] when the payload is not a JSON object;
/// untyped data is never passed through.
pub fn normalize(raw: Value, query: &MerchantQuery) -> Result<CanonicalResult> {
    let Some(object) = raw.as_object() else {
        return Err(KycError::Internal(
            "upstream payload has unexpected shape: expected a JSON object".to_owned(),
        ));
    };

    let status = object
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_owned();
    let is_active = status.eq_ignore_ascii_case("ACTIVE");

    let business_info = BusinessInfo {
        name: object
            .get("businessName")
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_owned(),
        is_active,
        status,
        registration_date: object
            .get("registrationDate")
            .and_then(Value::as_str)
            .map(normalize_date),
        document_number: object
            .get("documentNumber")
            .and_then(Value::as_str)
            .map(str::to_owned),
        economic_activity: object.get("economicActivity").cloned(),
        establishment_info: object.get("establishmentInfo").cloned(),
    };

    let contact_info = object
        .get("contactInfo")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    Ok(CanonicalResult {
        merchant_id: query.merchant_id.clone(),
        business_info,
        contact_info,
        raw_upstream_payload: query.include_raw_data.then_some(raw),
        response_timestamp: Utc::now(),
    })
}

/// Formats the upstream ecosystem actually uses for registration dates.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

fn normalize_date(raw: &str) -> String {
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return format!("{}Z", parsed.format("%Y-%m-%dT%H:%M:%S"));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return format!("{}T00:00:00Z", parsed.format("%Y-%m-%d"));
        }
    }
    // Keep the raw value rather than dropping information.
    warn!(date = raw, "could not parse registration date");
    raw.to_owned()
}
