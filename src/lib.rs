//! Webhook relay
//!
//! Receives JSON webhooks on `/webhook-{id}`, checks the endpoint's
//! signature, reshapes the body with the endpoint's mapping and forwards the
//! result to the configured destination with a single POST.
//!
//! The pieces live in their own crates and are wired together here:
//!
//! - [`relay_webhooks`]: endpoint and mapping records, the store, signature
//!   verification and the forwarder
//! - [`relay_transform`]: path expressions and the formula language
//! - [`relay_config`]: process settings
//! - [`relay_log`]: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use relay::{InMemoryStore, Pipeline, RelayServer, RelaySettings};
//! use std::sync::Arc;
//!
//! # async fn run() -> relay::Result<()> {
//! relay_log::init_from_env();
//!
//! let settings = RelaySettings::load(None)?;
//! let store = Arc::new(InMemoryStore::new());
//! let pipeline = Pipeline::from_settings(&settings, store)?;
//!
//! RelayServer::bind(settings.bind_addr(), pipeline)
//!     .await?
//!     .with_max_body_bytes(settings.max_body_bytes)
//!     .serve()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub mod pipeline;
pub mod seed;
pub mod server;

pub use error::{Error, Result};
pub use pipeline::{InboundRequest, Pipeline, PipelineError, PipelineOutcome, Stage, TerminalState};
pub use seed::{SeedError, SeedProblem, load_store, read_snapshot, undeclared_fields, validate_snapshot};
pub use server::{RelayServer, shutdown_signal};

pub use relay_config::RelaySettings;
pub use relay_transform::{Formula, PayloadTransformer};
pub use relay_webhooks::{
    DeliveryReceipt, Forwarder, ForwarderConfig, InMemoryStore, MappingDefinition, MappingStore,
    SignatureVerifier, StoreSnapshot, WebhookEndpoint,
};
