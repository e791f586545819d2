use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use serde_json::{json, Value};

use burrow_agent::channel::MessageHandler;
use burrow_agent::translator::{CommandTranslator, ExitNodeClient, ProxyConfigReloader};
use burrow_protocol::{message_types, ControlMessage};

#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    query: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct Capture {
    calls: Arc<Mutex<Vec<Call>>>,
}

async fn capture(State(capture): State<Capture>, method: Method, uri: Uri, body: String) -> StatusCode {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let status = match (method.as_str(), uri.path(), body["publicKey"].as_str()) {
        ("POST", "/peer", Some("existing")) => StatusCode::CONFLICT,
        ("DELETE", "/peer", Some("missing")) => StatusCode::NOT_FOUND,
        (_, "/update-destinations", _) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    capture.calls.lock().unwrap().push(Call {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body,
    });
    status
}

/// Local exit node API that records every request
async fn spawn_exit_node() -> (String, Capture) {
    let state = Capture::default();
    let app = Router::new().fallback(capture).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

#[derive(Default)]
struct CountingReloader {
    reloads: AtomicUsize,
}

#[async_trait]
impl ProxyConfigReloader for CountingReloader {
    async fn reload(&self) -> anyhow::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn translator() -> (Arc<CommandTranslator>, Capture, Arc<CountingReloader>) {
    let (base_url, capture) = spawn_exit_node().await;
    let reloader = Arc::new(CountingReloader::default());
    let exit_node = ExitNodeClient::new(reqwest::Client::new(), base_url);
    let translator = Arc::new(CommandTranslator::new(exit_node, reloader.clone()));
    (translator, capture, reloader)
}

fn message(message_type: &str, data: Value) -> ControlMessage {
    ControlMessage::new(message_type, data)
}

#[tokio::test]
async fn test_peer_remove_sends_delete_with_key() {
    let (translator, capture, _) = translator().await;

    translator
        .handle(message(message_types::PEERS_REMOVE, json!({ "publicKey": "abc" })))
        .await
        .unwrap();

    let calls = capture.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::DELETE);
    assert_eq!(calls[0].path, "/peer");
    assert_eq!(calls[0].query.as_deref(), Some("public_key=abc"));
    assert_eq!(calls[0].body, json!({ "publicKey": "abc" }));
}

#[tokio::test]
async fn test_peer_add_defaults_allowed_ips() {
    let (translator, capture, _) = translator().await;

    translator
        .handle(message(message_types::PEERS_ADD, json!({ "publicKey": "k1" })))
        .await
        .unwrap();

    let calls = capture.calls.lock().unwrap();
    assert_eq!(calls[0].method, Method::POST);
    assert_eq!(calls[0].path, "/peer");
    assert_eq!(calls[0].body, json!({ "publicKey": "k1", "allowedIps": [] }));
}

#[tokio::test]
async fn test_idempotent_peer_calls() {
    let (base_url, capture) = spawn_exit_node().await;
    let client = ExitNodeClient::new(reqwest::Client::new(), base_url);

    let add = burrow_protocol::PeerAdd {
        public_key: "existing".to_string(),
        allowed_ips: vec!["10.0.0.2/32".to_string()],
    };
    client.add_peer(&add).await.unwrap();

    let remove = burrow_protocol::PeerRemove {
        public_key: "missing".to_string(),
    };
    client.remove_peer(&remove).await.unwrap();

    assert_eq!(capture.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_call_is_dropped() {
    let (translator, capture, _) = translator().await;

    // the exit node answers 500; the handler still succeeds and nothing is retried
    translator
        .handle(message(message_types::UPDATE_DESTINATIONS, json!({ "destinations": [] })))
        .await
        .unwrap();

    assert_eq!(capture.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_payloads_are_relayed() {
    let (translator, capture, _) = translator().await;
    let mapping = json!({ "oldDestination": { "destinationIP": "10.0.0.5", "destinationPort": 80 } });

    translator
        .handle(message(message_types::UPDATE_PROXY_MAPPING, mapping.clone()))
        .await
        .unwrap();

    let calls = capture.calls.lock().unwrap();
    assert_eq!(calls[0].path, "/update-proxy-mapping");
    assert_eq!(calls[0].body, mapping);
}

#[tokio::test]
async fn test_reload_regenerates_proxy_config() {
    let (translator, capture, reloader) = translator().await;

    translator
        .handle(message(message_types::TRAEFIK_RELOAD, Value::Null))
        .await
        .unwrap();

    assert_eq!(reloader.reloads.load(Ordering::SeqCst), 1);
    assert!(capture.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let (translator, capture, _) = translator().await;

    let result = translator
        .handle(message(message_types::PEERS_ADD, json!({ "allowedIps": ["10.0.0.2/32"] })))
        .await;

    assert!(result.is_err());
    assert!(capture.calls.lock().unwrap().is_empty());
}
