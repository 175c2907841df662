//! Drives the relay server over real HTTP.

use relay::{
    Forwarder, ForwarderConfig, InMemoryStore, MappingDefinition, PayloadTransformer, Pipeline,
    RelayServer, SignatureVerifier, WebhookEndpoint,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "c2VjcmV0";

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(store: InMemoryStore, max_body_bytes: usize) -> Self {
        let forwarder = Forwarder::new(ForwarderConfig::builder().timeout(Duration::from_secs(2)).build()).unwrap();
        let pipeline = Pipeline::new(Arc::new(store), forwarder, PayloadTransformer::default());
        let server = RelayServer::bind("127.0.0.1:0", pipeline)
            .await
            .unwrap()
            .with_max_body_bytes(max_body_bytes)
            .with_drain_timeout(Duration::from_secs(1));
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

fn store_for(destination: &str) -> InMemoryStore {
    let store = InMemoryStore::new();
    store.insert_mapping(
        MappingDefinition::new("sms", r#"{ text: "Message: " + msg }"#)
            .with_id("m1")
            .with_field("msg", "$.object.data.object.body"),
    );
    store.insert_endpoint(
        WebhookEndpoint::builder("open", destination)
            .id("open")
            .mapping("m1")
            .build(),
    );
    store.insert_endpoint(
        WebhookEndpoint::builder("signed", destination)
            .id("signed")
            .signature(SECRET, "X-Sig")
            .mapping("m1")
            .build(),
    );
    store
}

async fn destination() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn sms_body() -> Value {
    json!({"object": {"data": {"object": {"body": "hi"}}}})
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start(InMemoryStore::new(), 1024).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"status": "ok"}));

    let response = client.post(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 405);

    server.stop().await;
}

#[tokio::test]
async fn test_webhook_delivered_on_both_paths() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(json!({"text": "Message: hi"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock)
        .await;

    let server = TestServer::start(store_for(&format!("{}/hook", mock.uri())), 64 * 1024).await;
    let client = reqwest::Client::new();

    for route in ["/webhook-open", "/api/webhook-open"] {
        let response = client.post(server.url(route)).json(&sms_body()).send().await.unwrap();
        assert_eq!(response.status(), 200, "{route}");
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({
                "status": "delivered",
                "endpoint": "open",
                "destinationStatus": 200,
                "message": "Webhook processed and sent to destination."
            })
        );
    }

    server.stop().await;
}

#[tokio::test]
async fn test_signature_statuses() {
    let mock = destination().await;
    let server = TestServer::start(store_for(&format!("{}/hook", mock.uri())), 64 * 1024).await;
    let client = reqwest::Client::new();
    let body = sms_body();

    let signature = SignatureVerifier::new(SECRET, "X-Sig").sign("1700000000", &body).unwrap();
    let response = client
        .post(server.url("/webhook-signed"))
        .header("X-Sig", &signature)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let forged = SignatureVerifier::new("b3RoZXI=", "X-Sig").sign("1700000000", &body).unwrap();
    let response = client
        .post(server.url("/webhook-signed"))
        .header("X-Sig", forged)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let error = response.json::<Value>().await.unwrap();
    assert_eq!(error["kind"], "authentication_failure");
    assert_eq!(error["status"], 401);

    let response = client
        .post(server.url("/webhook-signed"))
        .header("X-Sig", "hmac;1;1700000000")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(server.url("/webhook-signed"))
        .header("X-Sig", "sha1;1;1700000000;abc=")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let mock = destination().await;
    let server = TestServer::start(store_for(&format!("{}/hook", mock.uri())), 64).await;
    let client = reqwest::Client::new();

    let response = client.post(server.url("/webhook-nope")).body("anything").send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.json::<Value>().await.unwrap()["kind"], "config_not_found");

    let response = client.post(server.url("/webhook-open")).body("{ nope").send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.json::<Value>().await.unwrap()["kind"], "transformation_error");

    let response = client.get(server.url("/webhook-open")).send().await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "POST");

    let response = client.get(server.url("/no/such/route")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    let oversized = json!({"text": "x".repeat(256)});
    let response = client.post(server.url("/webhook-open")).json(&oversized).send().await.unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(response.json::<Value>().await.unwrap()["kind"], "payload_too_large");

    let response = client.post(server.url("/webhook-nope")).json(&oversized).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.json::<Value>().await.unwrap()["kind"], "config_not_found");

    server.stop().await;
}

#[tokio::test]
async fn test_cors() {
    let mock = destination().await;
    let server = TestServer::start(store_for(&format!("{}/hook", mock.uri())), 64 * 1024).await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, server.url("/webhook-signed"))
        .header("Origin", "https://app.example.com")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "x-sig,content-type")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["access-control-allow-headers"], "x-sig,content-type");
    assert!(
        response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap()
            .contains("POST")
    );

    let response = client
        .post(server.url("/webhook-open"))
        .header("Origin", "https://app.example.com")
        .json(&sms_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = client.get(server.url("/no/such/route")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    server.stop().await;
}

#[tokio::test]
async fn test_test_webhook_returns_payload() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"text": "Message: sample_value"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    let server = TestServer::start(store_for(&mock.uri()), 1024).await;
    let response = reqwest::Client::new()
        .post(server.url("/api/test-webhook/signed"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["payload"], json!({"text": "Message: sample_value"}));

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_destination_is_server_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let server = TestServer::start(store_for(&format!("http://127.0.0.1:{port}/hook")), 1024).await;

    let response = reqwest::Client::new()
        .post(server.url("/webhook-open"))
        .json(&sms_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.json::<Value>().await.unwrap()["kind"], "delivery_failure");

    server.stop().await;
}
