//! HTTP front end
//!
//! Accepts connections on a [`TcpListener`], serves each one on its own task
//! with hyper's HTTP/1 connection builder, and hands webhook calls to the
//! [`Pipeline`]. Every response body is JSON.

use crate::pipeline::{InboundRequest, Pipeline, PipelineError, PipelineOutcome};
use bytes::Bytes;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ALLOW, CONTENT_TYPE, HeaderMap,
};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info, warn};

/// Default time open connections get to finish after shutdown starts
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default largest accepted request body
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

const DELIVERED_MESSAGE: &str = "Webhook processed and sent to destination.";

const CORS_ALLOW_METHODS: &str = "GET, HEAD, PUT, PATCH, POST, DELETE";
const CORS_DEFAULT_HEADERS: &str = "Content-Type";
const CORS_MAX_AGE_SECS: &str = "86400";

struct ServerState {
    pipeline: Arc<Pipeline>,
    max_body_bytes: usize,
}

/// A bound relay server.
///
/// ```no_run
/// # async fn example(pipeline: relay::Pipeline) -> std::io::Result<()> {
/// let server = relay::RelayServer::bind("127.0.0.1:5000", pipeline).await?;
/// println!("listening on {}", server.local_addr()?);
/// server.serve().await
/// # }
/// ```
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    drain_timeout: Duration,
}

impl RelayServer {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(addr: impl ToSocketAddrs, pipeline: Pipeline) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                pipeline: Arc::new(pipeline),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            }),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// Reject request bodies larger than `limit` bytes with 413
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.state = Arc::new(ServerState {
            pipeline: self.state.pipeline.clone(),
            max_body_bytes: limit,
        });
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> std::io::Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `signal` completes, then drain open connections
    pub async fn serve_with_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            state,
            drain_timeout,
        } = self;
        let graceful = GracefulShutdown::new();
        tokio::pin!(signal);

        info!(addr = %listener.local_addr()?, "Webhook relay listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            warn!(error = %err, "Failed to accept connection");
                            continue;
                        }
                    };

                    let state = state.clone();
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = state.clone();
                        async move { handle_request(req, state).await }
                    });
                    let conn = graceful.watch(http1::Builder::new().serve_connection(TokioIo::new(stream), service));

                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            debug!(peer = %peer, error = %err, "Error serving connection");
                        }
                    });
                }
                _ = &mut signal => {
                    info!("Stopping acceptance of new connections");
                    break;
                }
            }
        }

        drop(listener);
        tokio::select! {
            _ = graceful.shutdown() => info!("All connections drained successfully"),
            _ = tokio::time::sleep(drain_timeout) => warn!(
                timeout_secs = drain_timeout.as_secs(),
                "Drain timeout elapsed with connections still open"
            ),
        }
        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Initiating graceful shutdown...");
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Webhook(&'a str),
    TestWebhook(&'a str),
    NotFound,
}

impl<'a> Route<'a> {
    fn resolve(path: &'a str) -> Self {
        if path == "/health" {
            return Route::Health;
        }
        if let Some(id) = path.strip_prefix("/api/test-webhook/") {
            return endpoint_id(id).map_or(Route::NotFound, Route::TestWebhook);
        }
        let webhook = path
            .strip_prefix("/api/webhook-")
            .or_else(|| path.strip_prefix("/webhook-"));
        match webhook.and_then(endpoint_id) {
            Some(id) => Route::Webhook(id),
            None => Route::NotFound,
        }
    }
}

fn endpoint_id(segment: &str) -> Option<&str> {
    let id = segment.strip_suffix('/').unwrap_or(segment);
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "Request received");

    if method == Method::OPTIONS {
        return Ok(preflight_response(req.headers()));
    }

    let mut response = match (Route::resolve(&path), &method) {
        (Route::Health, &Method::GET) => json_response(StatusCode::OK, &json!({ "status": "ok" })),
        (Route::Health, _) => method_not_allowed("GET"),
        (Route::Webhook(id), &Method::POST) => handle_webhook(req, id.to_string(), &state).await,
        (Route::TestWebhook(id), &Method::POST) => handle_test(id.to_string(), &state).await,
        (Route::Webhook(_) | Route::TestWebhook(_), _) => method_not_allowed("POST"),
        (Route::NotFound, _) => error_response(
            StatusCode::NOT_FOUND,
            "route_not_found",
            &format!("Route not found: {method} {path}"),
        ),
    };
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    Ok(response)
}

/// Answer a CORS preflight for any path, echoing the requested headers
fn preflight_response(request_headers: &HeaderMap) -> Response<Full<Bytes>> {
    let allow_headers = request_headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(CORS_DEFAULT_HEADERS));

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE_SECS));
    response
}

async fn handle_webhook(req: Request<Incoming>, endpoint_id: String, state: &ServerState) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, state.max_body_bytes).await {
        Ok(body) => body,
        // An unknown endpoint is reported as such whatever the body size.
        Err(BodyError::TooLarge(limit)) => {
            return match state.pipeline.endpoint(&endpoint_id).await {
                Ok(_) => error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    &format!("Request body exceeds {limit} bytes"),
                ),
                Err(err) => pipeline_error_response(&err),
            };
        }
        Err(BodyError::Read(message)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "bad_request",
                &format!("Failed to read request body: {message}"),
            );
        }
    };

    let pipeline = state.pipeline.clone();
    let request = InboundRequest {
        endpoint_id,
        headers: parts.headers,
        body,
    };
    // Detached so a caller hanging up does not cancel an in-flight delivery.
    match tokio::spawn(async move { pipeline.process(request).await }).await {
        Ok(outcome) => outcome_response(&outcome, false),
        Err(err) => task_failed(err),
    }
}

async fn handle_test(endpoint_id: String, state: &ServerState) -> Response<Full<Bytes>> {
    let pipeline = state.pipeline.clone();
    match tokio::spawn(async move { pipeline.test(&endpoint_id).await }).await {
        Ok(outcome) => outcome_response(&outcome, true),
        Err(err) => task_failed(err),
    }
}

enum BodyError {
    TooLarge(usize),
    Read(String),
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes, BodyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge(limit)),
        Err(err) => Err(BodyError::Read(err.to_string())),
    }
}

fn outcome_response(outcome: &PipelineOutcome, include_payload: bool) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = match &outcome.error {
        None => json!({
            "status": "delivered",
            "endpoint": outcome.endpoint_id,
            "destinationStatus": outcome.receipt.as_ref().map(|r| r.status_code),
            "message": DELIVERED_MESSAGE,
        }),
        Some(err) => pipeline_error_body(err),
    };

    if include_payload && let Some(payload) = &outcome.payload {
        body["payload"] = payload.clone();
    }
    json_response(status, &body)
}

fn pipeline_error_body(err: &PipelineError) -> Value {
    let mut body = json!({
        "error": err.to_string(),
        "kind": err.kind(),
        "status": err.status_code(),
    });
    if let PipelineError::Delivery(delivery) = err
        && let Some(code) = delivery.destination_status()
    {
        body["destinationStatus"] = json!(code);
    }
    body
}

fn pipeline_error_response(err: &PipelineError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &pipeline_error_body(err))
}

fn task_failed(err: tokio::task::JoinError) -> Response<Full<Bytes>> {
    error!(error = %err, "Pipeline task failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal server error")
}

fn method_not_allowed(allow: &'static str) -> Response<Full<Bytes>> {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed");
    response.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> Response<Full<Bytes>> {
    let body = json!({
        "error": message,
        "kind": kind,
        "status": status.as_u16(),
    });
    json_response(status, &body)
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Stage, TerminalState};
    use relay_webhooks::DeliveryError;

    #[test]
    fn test_route_resolution() {
        assert_eq!(Route::resolve("/health"), Route::Health);
        assert_eq!(Route::resolve("/webhook-abc"), Route::Webhook("abc"));
        assert_eq!(Route::resolve("/api/webhook-abc"), Route::Webhook("abc"));
        assert_eq!(Route::resolve("/webhook-abc/"), Route::Webhook("abc"));
        assert_eq!(Route::resolve("/api/test-webhook/abc"), Route::TestWebhook("abc"));
        assert_eq!(Route::resolve("/webhook-"), Route::NotFound);
        assert_eq!(Route::resolve("/webhook-a/b"), Route::NotFound);
        assert_eq!(Route::resolve("/api/test-webhook/"), Route::NotFound);
        assert_eq!(Route::resolve("/webhooks"), Route::NotFound);
        assert_eq!(Route::resolve("/"), Route::NotFound);
    }

    fn outcome(error: Option<PipelineError>, payload: Option<Value>) -> PipelineOutcome {
        PipelineOutcome {
            endpoint_id: "e1".into(),
            state: error.as_ref().map_or(TerminalState::Delivered, PipelineError::terminal_state),
            stages: vec![Stage::Received],
            payload,
            receipt: None,
            error,
            elapsed_ms: 3,
        }
    }

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = outcome_response(
            &outcome(Some(PipelineError::ConfigNotFound("Webhook endpoint e1 not found".into())), None),
            false,
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({"error": "Webhook endpoint e1 not found", "kind": "config_not_found", "status": 404})
        );
    }

    #[tokio::test]
    async fn test_delivery_error_reports_destination_status() {
        let err = PipelineError::Delivery(DeliveryError::Status {
            status: 503,
            body: None,
        });
        let response = outcome_response(&outcome(Some(err), Some(json!({"a": 1}))), false);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["kind"], "delivery_failure");
        assert_eq!(body["destinationStatus"], 503);
        assert!(body.get("payload").is_none());
    }

    #[tokio::test]
    async fn test_test_mode_includes_payload() {
        let response = outcome_response(&outcome(None, Some(json!({"text": "sample_value"}))), true);
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "delivered");
        assert_eq!(body["message"], DELIVERED_MESSAGE);
        assert_eq!(body["payload"], json!({"text": "sample_value"}));
    }

    #[test]
    fn test_preflight_echoes_requested_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_REQUEST_HEADERS, HeaderValue::from_static("x-sig, content-type"));

        let response = preflight_response(&headers);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_HEADERS], "x-sig, content-type");
        assert!(
            response.headers()[ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap()
                .contains("POST")
        );

        let response = preflight_response(&HeaderMap::new());
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_HEADERS], CORS_DEFAULT_HEADERS);
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow() {
        let response = method_not_allowed("POST");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");
    }
}
