use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::UsageEventError;

/// HTTP method of the API call the event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Represents a single API call attributed to a principal for billing purposes.
///
/// Events are append-only: once recorded they are never mutated or deleted,
/// and the event log is the source of truth the monthly counters can be
/// rebuilt from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Type of event, always "api_usage" for these events
    pub event_type: String,

    /// Schema version for forward compatibility
    pub version: String,

    /// Caller-supplied identifier used to deduplicate retried submissions
    pub request_id: String,

    /// Identifier for the principal the call is billed to
    pub principal_id: String,

    /// Identifier for the credential that authenticated the call, if any
    pub credential_id: Option<String>,

    /// Endpoint that was called
    pub endpoint: String,

    /// HTTP method of the call
    pub method: Method,

    /// Response status code
    pub status_code: u16,

    /// Round-trip latency in milliseconds
    pub latency_ms: u64,

    /// Credits charged for the call (policy-determined, typically 1)
    pub credits_charged: u64,

    /// Error text for failed calls
    pub error_text: Option<String>,

    /// When the call happened
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Creates a new UsageEvent with the current timestamp and a fresh
    /// request id.
    pub fn new(
        principal_id: String,
        credential_id: Option<String>,
        endpoint: String,
        method: Method,
        status_code: u16,
        latency_ms: u64,
        credits_charged: u64,
        error_text: Option<String>,
    ) -> Self {
        Self {
            event_type: "api_usage".to_string(),
            version: "1.0".to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            principal_id,
            credential_id,
            endpoint,
            method,
            status_code,
            latency_ms,
            credits_charged,
            error_text,
            timestamp: Utc::now(),
        }
    }

    /// Check that the event carries everything the billing ledger needs
    pub fn validate(&self) -> Result<(), UsageEventError> {
        if self.principal_id.is_empty() {
            return Err(UsageEventError::InvalidEvent(
                "missing principal id".to_string(),
            ));
        }
        if self.request_id.is_empty() {
            return Err(UsageEventError::InvalidEvent(
                "missing request id".to_string(),
            ));
        }
        Ok(())
    }
}
