//! Single-attempt delivery of transformed payloads

use crate::delivery::{MAX_RESPONSE_BODY, truncate_string};
use crate::{DeliveryError, DeliveryReceipt, ForwarderConfig, WebhookError};
use chrono::Utc;
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Posts JSON payloads to destination URLs.
///
/// Each call to [`Forwarder::forward`] makes exactly one HTTP attempt.
/// Failures are classified and returned; nothing is retried or queued.
#[derive(Debug, Clone)]
pub struct Forwarder {
    config: ForwarderConfig,
    http_client: Client,
}

impl Forwarder {
    /// Create a forwarder with its own connection pool
    pub fn new(config: ForwarderConfig) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// POST `payload` as JSON to `destination`.
    ///
    /// Any 2xx answer is a success; everything else is a [`DeliveryError`].
    /// The outcome is decided by the status line alone: at most
    /// [`MAX_RESPONSE_BODY`] bytes of the response body are read, and a body
    /// that fails mid-read is kept as whatever arrived.
    pub async fn forward(
        &self,
        destination: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let url = parse_destination(destination)?;

        let body =
            serde_json::to_vec(payload).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        if body.len() > self.config.max_payload_size {
            return Err(DeliveryError::PayloadTooLarge {
                size: body.len(),
                max: self.config.max_payload_size,
            });
        }

        debug!(destination = %url, bytes = body.len(), "Forwarding payload");

        let started_at = Utc::now();
        let start = Instant::now();

        let mut response = self
            .http_client
            .post(url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let response_body = read_body(&mut response).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if status.is_success() {
            info!(
                destination,
                status = status.as_u16(),
                elapsed_ms,
                "Payload delivered"
            );
            Ok(DeliveryReceipt::new(
                destination,
                status.as_u16(),
                response_body,
                started_at,
                elapsed_ms,
            ))
        } else {
            warn!(
                destination,
                status = status.as_u16(),
                elapsed_ms,
                "Destination rejected payload"
            );
            Err(DeliveryError::Status {
                status: status.as_u16(),
                body: response_body,
            })
        }
    }

    fn classify(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            warn!(timeout_ms = self.config.timeout.as_millis() as u64, "Delivery timed out");
            DeliveryError::Timeout(self.config.timeout)
        } else {
            warn!(error = %err, "Delivery transport failure");
            DeliveryError::Transport(err.to_string())
        }
    }
}

/// Read the start of a response body, stopping once enough is buffered
async fn read_body(response: &mut reqwest::Response) -> Option<String> {
    let mut buf = Vec::new();
    while buf.len() <= MAX_RESPONSE_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, read = buf.len(), "Response body read failed");
                break;
            }
        }
    }
    if buf.is_empty() {
        return None;
    }
    Some(truncate_string(&String::from_utf8_lossy(&buf), MAX_RESPONSE_BODY))
}

fn parse_destination(destination: &str) -> Result<Url, DeliveryError> {
    let invalid = |reason: String| DeliveryError::InvalidDestination {
        url: destination.to_string(),
        reason,
    };

    let url = Url::parse(destination).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forwarder() -> Forwarder {
        Forwarder::new(ForwarderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_forward_posts_json_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"text": "Message: hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("1"))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = forwarder()
            .forward(&format!("{}/hook", server.uri()), &json!({"text": "Message: hi"}))
            .await
            .unwrap();

        assert_eq!(receipt.status_code, 200);
        assert_eq!(receipt.response_body.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let err = forwarder()
            .forward(&server.uri(), &json!({}))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DeliveryError::Status {
                status: 503,
                body: Some("busy".into())
            }
        );
        assert_eq!(err.destination_status(), Some(503));
    }

    #[tokio::test]
    async fn test_large_response_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4 * 1024 * 1024)))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = forwarder().forward(&server.uri(), &json!({})).await.unwrap();

        let body = receipt.response_body.unwrap();
        assert_eq!(body.len(), MAX_RESPONSE_BODY + 3);
        assert!(body.ends_with("..."));
    }

    #[tokio::test]
    async fn test_broken_body_after_2xx_is_delivered() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let receipt = forwarder()
            .forward(&format!("http://{addr}/hook"), &json!({"text": "hi"}))
            .await
            .unwrap();

        assert_eq!(receipt.status_code, 200);
        assert_eq!(receipt.response_body.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = ForwarderConfig::builder()
            .timeout(Duration::from_millis(100))
            .build();
        let err = Forwarder::new(config)
            .unwrap()
            .forward(&server.uri(), &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = forwarder()
            .forward(&format!("http://{addr}/hook"), &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_invalid_destination() {
        for dest in ["not a url", "/relative", "ftp://example.com/x"] {
            let err = forwarder().forward(dest, &json!({})).await.unwrap_err();
            assert!(
                matches!(err, DeliveryError::InvalidDestination { .. }),
                "{dest}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let config = ForwarderConfig::builder().max_payload_size(10).build();
        let err = Forwarder::new(config)
            .unwrap()
            .forward(
                "http://localhost:9999/webhook",
                &json!({"large": "This is definitely more than 10 bytes"}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::PayloadTooLarge { max: 10, .. }));
    }
}
