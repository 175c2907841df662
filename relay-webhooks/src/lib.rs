//! Endpoints, signatures and delivery for the webhook relay
//!
//! This crate holds everything the relay needs on either side of the
//! payload transformation:
//!
//! - **Endpoint model**: [`WebhookEndpoint`] and [`MappingDefinition`] records
//! - **Storage**: the [`MappingStore`] read path and an [`InMemoryStore`]
//! - **Signature verification**: `hmac;1;timestamp;digest` headers checked
//!   with HMAC-SHA256 over the canonical JSON body
//! - **Delivery**: a [`Forwarder`] that posts one JSON payload per call
//!
//! # Example: Verifying an inbound call
//!
//! ```rust
//! use relay_webhooks::{SignatureVerifier, Verdict};
//!
//! let verifier = SignatureVerifier::new("c2VjcmV0", "X-Signature");
//! let body = serde_json::json!({"event": "message.received"});
//! let header = verifier.sign("1700000000", &body).unwrap();
//!
//! let mut headers = http::HeaderMap::new();
//! headers.insert("x-signature", header.parse().unwrap());
//! assert_eq!(verifier.verify(&headers, &body), Verdict::Allow);
//! ```
//!
//! # Example: Forwarding a payload
//!
//! ```rust,no_run
//! use relay_webhooks::{Forwarder, ForwarderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let forwarder = Forwarder::new(ForwarderConfig::default())?;
//!     let receipt = forwarder
//!         .forward("https://example.com/hook", &serde_json::json!({"text": "hi"}))
//!         .await?;
//!     println!("delivered with HTTP {}", receipt.status_code);
//!     Ok(())
//! }
//! ```

mod config;
mod delivery;
mod endpoint;
mod error;
mod forwarder;
mod mapping;
mod signature;
mod store;

pub use config::{ForwarderConfig, ForwarderConfigBuilder};
pub use delivery::{DeliveryReceipt, MAX_RESPONSE_BODY};
pub use endpoint::{WebhookEndpoint, WebhookEndpointBuilder};
pub use error::{DeliveryError, StoreError, WebhookError};
pub use forwarder::Forwarder;
pub use mapping::MappingDefinition;
pub use signature::{
    RejectReason, SCHEME, SignatureHeader, SignatureVerifier, VERSION, Verdict, canonical_json,
    compute_digest,
};
pub use store::{InMemoryStore, MappingStore, StoreSnapshot};

/// Result type for relay component construction
pub type Result<T> = std::result::Result<T, WebhookError>;
