//! Stateful streamable transport behavior over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use spacegate_protocol::types::Implementation;
use spacegate_server::{capabilities, McpRouter, ServerResult, ToolRegistry};
use spacegate_transport::auth::{AuthGate, TokenValidator};
use spacegate_transport::streamable::{StreamableHttpOptions, StreamableHttpTransport};
use spacegate_transport::{
    ConnectionCount, FactoryRequest, McpServerFactory, ScopedServer, ServerTransport,
    SESSION_ID_HEADER,
};

struct EmptyFactory;

#[async_trait]
impl McpServerFactory for EmptyFactory {
    async fn create(&self, _request: FactoryRequest) -> ServerResult<ScopedServer> {
        Ok(ScopedServer {
            router: Arc::new(McpRouter::new(
                Implementation {
                    name: "spacegate".to_string(),
                    version: "0".to_string(),
                    title: None,
                },
                Some("session-scoped instructions".to_string()),
                capabilities::build(false, false),
                ToolRegistry::new(),
            )),
            username: None,
        })
    }
}

struct Harness {
    base: String,
    transport: StreamableHttpTransport,
    client: reqwest::Client,
}

async fn harness() -> Harness {
    let gate = AuthGate::new(
        TokenValidator::new(
            reqwest::Client::new(),
            &Url::parse("http://127.0.0.1:9").unwrap(),
            std::time::Duration::from_millis(200),
        ),
        "http://gateway.test/mcp",
    );
    let transport = StreamableHttpTransport::new(
        Arc::new(EmptyFactory),
        gate,
        StreamableHttpOptions::default(),
        json!({"transport": "streamable"}),
    );
    transport.initialize().await.unwrap();

    let app = transport.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        base: format!("http://{addr}"),
        transport,
        client: reqwest::Client::new(),
    }
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "ide", "version": "1.0"}
        },
        "id": 1
    })
}

async fn open_session(h: &Harness) -> String {
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response
        .headers()
        .get(SESSION_ID_HEADER)
        .expect("initialize must return a session id")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn initialize_creates_a_session() {
    let h = harness().await;
    let session_id = open_session(&h).await;
    assert!(session_id.starts_with("mcp-"));
    assert_eq!(h.transport.active_connection_count(), ConnectionCount::Exact(1));

    let sessions = h.transport.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].client_info.as_ref().unwrap().name, "ide");
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let h = harness().await;
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["id"], 5);
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let h = harness().await;
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, "mcp-bogus")
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": 6}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn session_requests_route_to_the_scoped_server() {
    let h = harness().await;
    let session_id = open_session(&h).await;

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["tools"], json!([]));

    let sessions = h.transport.sessions();
    assert_eq!(sessions[0].request_count, 1);
}

#[tokio::test]
async fn delete_terminates_the_session() {
    let h = harness().await;
    let session_id = open_session(&h).await;

    let response = h
        .client
        .delete(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(h.transport.active_connection_count(), ConnectionCount::Exact(0));

    let response = h
        .client
        .delete(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn sse_attach_requires_and_honors_the_session() {
    let h = harness().await;

    let response = h.client.get(format!("{}/mcp", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let session_id = open_session(&h).await;
    let response = h
        .client
        .get(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn draining_rejects_new_work_with_shutdown_error() {
    let h = harness().await;
    let session_id = open_session(&h).await;
    h.transport.shutdown();

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);

    h.transport.cleanup().await.unwrap();
    assert_eq!(h.transport.active_connection_count(), ConnectionCount::Exact(0));
}

#[tokio::test]
async fn management_surface_reports_state() {
    let h = harness().await;
    open_session(&h).await;

    let metrics: Value = h
        .client
        .get(format!("{}/api/metrics", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["sessions_created"], 1);
    assert_eq!(metrics["requests"], 1);

    let sessions: Value = h
        .client
        .get(format!("{}/api/sessions", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    let config: Value = h
        .client
        .get(format!("{}/api/config", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["transport"], "streamable");

    let health: Value = h
        .client
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}
