//! Error types for endpoint configuration, storage and delivery

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or validating relay components
#[derive(Error, Debug)]
pub enum WebhookError {
    /// An endpoint record breaks one of its invariants
    #[error("Invalid endpoint {id}: {reason}")]
    InvalidEndpoint { id: String, reason: String },

    /// The signing secret is not valid base64
    #[error("Signing secret is not valid base64: {0}")]
    InvalidSecret(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of the single outbound delivery attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The destination is not an absolute http(s) URL
    #[error("Invalid destination URL {url}: {reason}")]
    InvalidDestination { url: String, reason: String },

    /// The transformed payload exceeds the configured size limit
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload could not be encoded
    #[error("Payload could not be serialized: {0}")]
    Serialization(String),

    /// No response within the configured timeout
    #[error("Destination did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connection refused, DNS failure, TLS failure and similar
    #[error("Destination unreachable: {0}")]
    Transport(String),

    /// The destination answered with a non-2xx status
    #[error("Destination returned HTTP {status}")]
    Status { status: u16, body: Option<String> },
}

impl DeliveryError {
    /// HTTP status reported by the destination, if it answered at all
    pub fn destination_status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of the endpoint/mapping backing store itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not serve the read
    #[error("Mapping store unavailable: {0}")]
    Unavailable(String),
}
