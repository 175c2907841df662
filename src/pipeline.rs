//! Request pipeline
//!
//! One inbound call walks `Received → Verifying → Extracting → Transforming
//! → Delivering` and ends in exactly one [`TerminalState`]. Every component
//! failure is mapped to a single [`PipelineError`] variant at the stage that
//! produced it.

use bytes::Bytes;
use http::HeaderMap;
use relay_config::RelaySettings;
use relay_transform::{ExtractedFields, PayloadTransformer, TransformError};
use relay_webhooks::{
    DeliveryError, DeliveryReceipt, Forwarder, ForwarderConfig, MappingDefinition, MappingStore,
    RejectReason, SignatureVerifier, StoreError, Verdict, WebhookEndpoint, WebhookError,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default upper bound for a single store lookup
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Non-terminal pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Verifying,
    Extracting,
    Transforming,
    Delivering,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::Verifying => "VERIFYING",
            Stage::Extracting => "EXTRACTING",
            Stage::Transforming => "TRANSFORMING",
            Stage::Delivering => "DELIVERING",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Delivered,
    /// Signature verification failed
    Rejected,
    /// Unknown endpoint, or its mapping is missing
    NotFound,
    /// The body could not be reshaped
    BadMapping,
    DeliveryFailed,
    /// The relay's own infrastructure failed
    InternalError,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Delivered => "DELIVERED",
            TerminalState::Rejected => "REJECTED",
            TerminalState::NotFound => "NOT_FOUND",
            TerminalState::BadMapping => "BAD_MAPPING",
            TerminalState::DeliveryFailed => "DELIVERY_FAILED",
            TerminalState::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified pipeline failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Unknown endpoint or mapping
    #[error("{0}")]
    ConfigNotFound(String),

    #[error("Signature verification failed: {0}")]
    Authentication(RejectReason),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Store failure, timeout or a crashed task
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// HTTP status reported to the caller
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::ConfigNotFound(_) => 404,
            PipelineError::Authentication(reason) => reason.status_code(),
            PipelineError::Transformation(_) => 400,
            PipelineError::Delivery(_) | PipelineError::Internal(_) => 500,
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ConfigNotFound(_) => "config_not_found",
            PipelineError::Authentication(_) => "authentication_failure",
            PipelineError::Transformation(_) => "transformation_error",
            PipelineError::Delivery(_) => "delivery_failure",
            PipelineError::Internal(_) => "internal_error",
        }
    }

    pub fn terminal_state(&self) -> TerminalState {
        match self {
            PipelineError::ConfigNotFound(_) => TerminalState::NotFound,
            PipelineError::Authentication(_) => TerminalState::Rejected,
            PipelineError::Transformation(_) => TerminalState::BadMapping,
            PipelineError::Delivery(_) => TerminalState::DeliveryFailed,
            PipelineError::Internal(_) => TerminalState::InternalError,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

/// An inbound webhook call
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub endpoint_id: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(endpoint_id: impl Into<String>, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            headers,
            body: body.into(),
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub endpoint_id: String,
    pub state: TerminalState,
    /// Every stage entered, in order
    pub stages: Vec<Stage>,
    /// Transformed payload, once the formula succeeded
    pub payload: Option<Value>,
    pub receipt: Option<DeliveryReceipt>,
    pub error: Option<PipelineError>,
    pub elapsed_ms: u64,
}

impl PipelineOutcome {
    pub fn is_delivered(&self) -> bool {
        self.state == TerminalState::Delivered
    }

    /// HTTP status reported to the caller
    pub fn status_code(&self) -> u16 {
        self.error.as_ref().map_or(200, PipelineError::status_code)
    }

    /// Last stage entered before the terminal state
    pub fn last_stage(&self) -> Option<Stage> {
        self.stages.last().copied()
    }
}

/// Per-run bookkeeping
struct Run {
    endpoint_id: String,
    stages: Vec<Stage>,
    payload: Option<Value>,
    receipt: Option<DeliveryReceipt>,
    started: Instant,
}

impl Run {
    fn new(endpoint_id: &str) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            stages: Vec::with_capacity(5),
            payload: None,
            receipt: None,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(endpoint = %self.endpoint_id, stage = %stage, "Entering stage");
        self.stages.push(stage);
    }

    fn finish(self, result: Result<(), PipelineError>, mode: &'static str) -> PipelineOutcome {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let (state, error) = match result {
            Ok(()) => (TerminalState::Delivered, None),
            Err(err) => (err.terminal_state(), Some(err)),
        };
        let stage = self.stages.last().map_or("NONE", Stage::as_str);

        match &error {
            None => info!(
                endpoint = %self.endpoint_id,
                mode,
                state = %state,
                stage,
                elapsed_ms,
                "Webhook delivered"
            ),
            Some(PipelineError::Internal(message)) => error!(
                endpoint = %self.endpoint_id,
                mode,
                state = %state,
                stage,
                elapsed_ms,
                error = %message,
                "Webhook pipeline failed"
            ),
            Some(err) => warn!(
                endpoint = %self.endpoint_id,
                mode,
                state = %state,
                stage,
                elapsed_ms,
                kind = err.kind(),
                error = %err,
                "Webhook not delivered"
            ),
        }

        PipelineOutcome {
            endpoint_id: self.endpoint_id,
            state,
            stages: self.stages,
            payload: self.payload,
            receipt: self.receipt,
            error,
            elapsed_ms,
        }
    }
}

/// Verifies, reshapes and forwards inbound webhooks.
///
/// Holds no per-request state, so one instance serves every concurrent call.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn MappingStore>,
    forwarder: Forwarder,
    transformer: PayloadTransformer,
    store_timeout: Duration,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("forwarder", &self.forwarder)
            .field("transformer", &self.transformer)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(store: Arc<dyn MappingStore>, forwarder: Forwarder, transformer: PayloadTransformer) -> Self {
        Self {
            store,
            forwarder,
            transformer,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Build the forwarder and transformer from process settings
    pub fn from_settings(settings: &RelaySettings, store: Arc<dyn MappingStore>) -> Result<Self, WebhookError> {
        let forwarder = Forwarder::new(
            ForwarderConfig::builder()
                .timeout(settings.delivery_timeout())
                .user_agent(settings.user_agent.clone())
                .max_payload_size(settings.max_body_bytes)
                .verify_ssl(settings.verify_tls)
                .build(),
        )?;
        let transformer = PayloadTransformer::new(usize::try_from(settings.formula_step_budget).unwrap_or(usize::MAX));
        Ok(Self::new(store, forwarder, transformer).with_store_timeout(settings.store_timeout()))
    }

    /// Bound every store lookup by `timeout`
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Run a real inbound call through every stage
    pub async fn process(&self, request: InboundRequest) -> PipelineOutcome {
        let mut run = Run::new(&request.endpoint_id);
        let result = self.run_live(&mut run, request).await;
        run.finish(result, "live")
    }

    /// Run with placeholder fields instead of a body; no signature check
    pub async fn test(&self, endpoint_id: &str) -> PipelineOutcome {
        let mut run = Run::new(endpoint_id);
        let result = self.run_test(&mut run).await;
        run.finish(result, "test")
    }

    async fn run_live(&self, run: &mut Run, request: InboundRequest) -> Result<(), PipelineError> {
        run.enter(Stage::Received);
        let endpoint = self.endpoint(&request.endpoint_id).await?;
        let body = parse_body(&request.body)?;

        run.enter(Stage::Verifying);
        if let Verdict::Reject(reason) = SignatureVerifier::for_endpoint(&endpoint).verify(&request.headers, &body) {
            return Err(PipelineError::Authentication(reason));
        }

        run.enter(Stage::Extracting);
        let mapping = self.load_mapping(&endpoint).await?;
        let fields = self.transformer.fields(&body, &mapping);

        self.transform_and_deliver(run, &endpoint, &mapping, &fields).await
    }

    async fn run_test(&self, run: &mut Run) -> Result<(), PipelineError> {
        run.enter(Stage::Received);
        let endpoint = self.endpoint(&run.endpoint_id).await?;

        run.enter(Stage::Extracting);
        let mapping = self.load_mapping(&endpoint).await?;
        let fields = self.transformer.sample_fields(&mapping);

        self.transform_and_deliver(run, &endpoint, &mapping, &fields).await
    }

    async fn transform_and_deliver(
        &self,
        run: &mut Run,
        endpoint: &WebhookEndpoint,
        mapping: &MappingDefinition,
        fields: &ExtractedFields,
    ) -> Result<(), PipelineError> {
        run.enter(Stage::Transforming);
        let payload = self.transformer.transform(&mapping.formula, fields)?;

        run.enter(Stage::Delivering);
        let delivered = self.forwarder.forward(&endpoint.destination, &payload).await;
        run.payload = Some(payload);
        run.receipt = Some(delivered?);
        Ok(())
    }

    /// Look up an endpoint under the store timeout
    pub async fn endpoint(&self, id: &str) -> Result<WebhookEndpoint, PipelineError> {
        self.bounded("endpoint", self.store.get_endpoint(id))
            .await?
            .ok_or_else(|| PipelineError::ConfigNotFound(format!("Webhook endpoint {id} not found")))
    }

    async fn load_mapping(&self, endpoint: &WebhookEndpoint) -> Result<MappingDefinition, PipelineError> {
        let Some(mapping_id) = endpoint.mapping_id.as_deref() else {
            return Err(PipelineError::ConfigNotFound(format!(
                "Webhook endpoint {} has no mapping",
                endpoint.id
            )));
        };
        self.bounded("mapping", self.store.get_mapping(mapping_id))
            .await?
            .ok_or_else(|| PipelineError::ConfigNotFound(format!("Mapping {mapping_id} not found")))
    }

    async fn bounded<T, F>(&self, record: &str, lookup: F) -> Result<Option<T>, PipelineError>
    where
        F: Future<Output = Result<Option<T>, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, lookup).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::Internal(format!(
                "Mapping store did not return the {record} within {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Value, PipelineError> {
    if body.is_empty() {
        return Err(TransformError::InvalidBody("request body is empty".to_string()).into());
    }
    serde_json::from_slice(body)
        .map_err(|e| TransformError::InvalidBody(format!("request body is not JSON: {e}")).into())
}
