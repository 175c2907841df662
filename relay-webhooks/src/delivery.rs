//! Record of a completed delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest response body kept on a receipt, in bytes
pub const MAX_RESPONSE_BODY: usize = 1024;

/// Proof that the destination accepted a payload with a 2xx status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Unique delivery ID
    pub id: String,

    /// URL the payload was posted to
    pub destination: String,

    /// Status returned by the destination
    pub status_code: u16,

    /// Response body, truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,

    /// When the request was started
    pub started_at: DateTime<Utc>,

    /// Wall time of the attempt
    pub elapsed_ms: u64,
}

impl DeliveryReceipt {
    pub(crate) fn new(
        destination: impl Into<String>,
        status_code: u16,
        response_body: Option<String>,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            destination: destination.into(),
            status_code,
            response_body: response_body.map(|s| truncate_string(&s, MAX_RESPONSE_BODY)),
            started_at,
            elapsed_ms,
        }
    }
}

/// Truncate a string to at most `max_len` bytes on a char boundary
pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
