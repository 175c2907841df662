//! Inbound webhook endpoint configuration

use crate::WebhookError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured inbound webhook URL and where its payloads go
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    /// Unique endpoint ID, the discriminator in `/webhook-{id}`
    pub id: String,

    /// Display label
    pub name: String,

    /// Absolute URL the transformed payload is posted to
    pub destination: String,

    /// Base64 shared secret; verification is enabled when set together
    /// with `signature_header_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_secret: Option<String>,

    /// Header carrying the `scheme;version;timestamp;digest` signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_header_name: Option<String>,

    /// Weak reference to a mapping definition; may dangle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,

    /// Created timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Create a new endpoint with a generated ID
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            destination: destination.into(),
            signature_secret: None,
            signature_header_name: None,
            mapping_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a builder for custom configuration
    pub fn builder(name: impl Into<String>, destination: impl Into<String>) -> WebhookEndpointBuilder {
        WebhookEndpointBuilder::new(name, destination)
    }

    /// Path the relay serves this endpoint on
    pub fn inbound_path(&self) -> String {
        format!("/webhook-{}", self.id)
    }

    /// Public URL of this endpoint under `domain`
    pub fn inbound_url(&self, domain: &str) -> String {
        format!("{}{}", domain.trim_end_matches('/'), self.inbound_path())
    }

    /// Whether inbound calls must carry a valid signature
    pub fn requires_signature(&self) -> bool {
        self.signature_secret.is_some() && self.signature_header_name.is_some()
    }

    /// Check the record invariants before it is stored.
    pub fn validate(&self) -> Result<(), WebhookError> {
        let invalid = |reason: String| WebhookError::InvalidEndpoint {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id cannot be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }

        let url = url::Url::parse(&self.destination)
            .map_err(|e| invalid(format!("destination is not a URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "destination scheme must be http or https, got {}",
                url.scheme()
            )));
        }

        match (&self.signature_secret, &self.signature_header_name) {
            (Some(secret), Some(header)) => {
                STANDARD
                    .decode(secret)
                    .map_err(|e| WebhookError::InvalidSecret(e.to_string()))?;
                http::HeaderName::from_bytes(header.as_bytes())
                    .map_err(|_| invalid(format!("{header:?} is not a valid header name")))?;
            }
            (None, None) => {}
            _ => {
                return Err(invalid(
                    "signatureSecret and signatureHeaderName must be set together".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field(
                "signature_secret",
                &self.signature_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("signature_header_name", &self.signature_header_name)
            .field("mapping_id", &self.mapping_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Builder for WebhookEndpoint
#[derive(Debug, Clone)]
pub struct WebhookEndpointBuilder {
    endpoint: WebhookEndpoint,
}

impl WebhookEndpointBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            endpoint: WebhookEndpoint::new(name, destination),
        }
    }

    /// Set a custom ID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.endpoint.id = id.into();
        self
    }

    /// Enable signature verification with a base64 secret and header name
    pub fn signature(mut self, secret: impl Into<String>, header_name: impl Into<String>) -> Self {
        self.endpoint.signature_secret = Some(secret.into());
        self.endpoint.signature_header_name = Some(header_name.into());
        self
    }

    /// Attach a mapping definition by ID
    pub fn mapping(mut self, mapping_id: impl Into<String>) -> Self {
        self.endpoint.mapping_id = Some(mapping_id.into());
        self
    }

    /// Build the endpoint
    pub fn build(self) -> WebhookEndpoint {
        self.endpoint
    }
}
