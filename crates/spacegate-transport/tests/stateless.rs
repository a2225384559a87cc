//! Stateless transport behavior with an instrumented factory.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

use spacegate_protocol::types::Implementation;
use spacegate_server::{capabilities, FnTool, McpRouter, ServerResult, ToolRegistry};
use spacegate_transport::auth::{AuthGate, TokenValidator};
use spacegate_transport::stateless::{StatelessHttpTransport, StatelessOptions};
use spacegate_transport::{
    FactoryRequest, McpServerFactory, ScopedServer, ServerTransport, SESSION_ID_HEADER,
};

/// Factory that records every request it gets and serves a fixed tool.
#[derive(Default)]
struct RecordingFactory {
    calls: AtomicUsize,
    skip_flags: Mutex<Vec<bool>>,
    headers: Mutex<Vec<std::collections::HashMap<String, String>>>,
}

#[async_trait]
impl McpServerFactory for RecordingFactory {
    async fn create(&self, request: FactoryRequest) -> ServerResult<ScopedServer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.skip_flags.lock().push(request.skip_gradio);
        self.headers.lock().push(request.headers.clone());

        let mut registry = ToolRegistry::new();
        registry.register(
            spacegate_protocol::types::Tool {
                name: "echo_marker".to_string(),
                title: None,
                description: None,
                input_schema: json!({"type": "object", "properties": {}}),
            },
            FnTool::new(|_, _| async {
                Ok(spacegate_protocol::types::CallToolResult::text("marker"))
            }),
        );
        Ok(ScopedServer {
            router: Arc::new(McpRouter::new(
                Implementation {
                    name: "spacegate".to_string(),
                    version: "0".to_string(),
                    title: None,
                },
                None,
                capabilities::build(false, false),
                registry,
            )),
            username: None,
        })
    }
}

struct Harness {
    base: String,
    factory: Arc<RecordingFactory>,
    transport: StatelessHttpTransport,
    client: reqwest::Client,
}

async fn harness(options: StatelessOptions) -> Harness {
    let factory = Arc::new(RecordingFactory::default());
    let gate = AuthGate::new(
        TokenValidator::new(
            reqwest::Client::new(),
            // Never reached in these tests: no request carries a token.
            &Url::parse("http://127.0.0.1:9").unwrap(),
            std::time::Duration::from_millis(200),
        ),
        "http://gateway.test/mcp",
    );
    let transport = StatelessHttpTransport::new(
        Arc::clone(&factory) as Arc<dyn McpServerFactory>,
        gate,
        options,
        json!({"transport": "stateless"}),
    );

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
        factory,
        transport,
        client: reqwest::Client::new(),
    }
}

fn rpc(method: &str, params: Value, id: i64) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id})
}

#[tokio::test]
async fn stub_answers_out_of_set_methods_without_a_factory() {
    let h = harness(StatelessOptions::default()).await;

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&rpc("ping", json!({}), 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], json!({}));

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&rpc("resources/list", json!({}), 2))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["resources"], json!([]));

    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resource_capable_clients_bypass_the_stub_for_resources() {
    let h = harness(StatelessOptions::default()).await;

    // An unrecognized client stays on the stub.
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header("user-agent", "some-ide/2.1")
        .json(&rpc("resources/list", json!({}), 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 0);

    // A resource-capable client gets a full scoped server.
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header("user-agent", "Claude-Desktop/1.5 (macOS)")
        .json(&rpc("resources/list", json!({}), 2))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["resources"], json!([]));
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn full_set_methods_build_a_fresh_server_each_time() {
    let h = harness(StatelessOptions::default()).await;

    for id in 1..=2 {
        let response = h
            .client
            .post(format!("{}/mcp", h.base))
            .json(&rpc("tools/list", json!({}), id))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["result"]["tools"][0]["name"], "echo_marker");
    }
    assert_eq!(h.factory.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skip_gradio_applies_to_initialize_and_non_gradio_calls() {
    let h = harness(StatelessOptions::default()).await;
    let post = |body: Value| {
        let client = h.client.clone();
        let url = format!("{}/mcp", h.base);
        async move { client.post(url).json(&body).send().await.unwrap() }
    };

    post(rpc(
        "initialize",
        json!({"protocolVersion": "2025-06-18", "clientInfo": {"name": "t", "version": "1"}}),
        1,
    ))
    .await;
    post(rpc("tools/call", json!({"name": "echo_marker"}), 2)).await;
    post(rpc("tools/call", json!({"name": "gr1_acme_foo_infer"}), 3)).await;
    post(rpc("tools/list", json!({}), 4)).await;

    let flags = h.factory.skip_flags.lock().clone();
    // initialize: skip; non-gradio call: skip; gradio-shaped call: full;
    // tools/list: full.
    assert_eq!(flags, vec![true, true, false, false]);
}

#[tokio::test]
async fn analytics_mode_issues_and_deletes_sessions() {
    let h = harness(StatelessOptions {
        analytics_sessions: true,
        ..StatelessOptions::default()
    })
    .await;

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&rpc(
            "initialize",
            json!({"protocolVersion": "2025-06-18", "clientInfo": {"name": "t", "version": "1"}}),
            1,
        ))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .expect("analytics initialize issues a session id")
        .to_str()
        .unwrap()
        .to_string();

    assert_eq!(h.transport.sessions().len(), 1);

    // Activity updates never affect routing.
    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .json(&rpc("tools/list", json!({}), 2))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = h
        .client
        .delete(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert!(h.transport.sessions().is_empty());
}

#[tokio::test]
async fn delete_is_rejected_outside_analytics_mode() {
    let h = harness(StatelessOptions::default()).await;
    let response = h
        .client
        .delete(format!("{}/mcp", h.base))
        .header(SESSION_ID_HEADER, "mcp-whatever")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32002);
}

#[tokio::test]
async fn draining_rejects_new_requests() {
    let h = harness(StatelessOptions::default()).await;
    h.transport.shutdown();

    let response = h
        .client
        .post(format!("{}/mcp", h.base))
        .json(&rpc("tools/list", json!({}), 9))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["id"], 9);
}

#[tokio::test]
async fn welcome_page_and_405_modes() {
    let h = harness(StatelessOptions::default()).await;
    let response = h.client.get(format!("{}/mcp", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("spacegate"));

    let h = harness(StatelessOptions {
        welcome_page: false,
        ..StatelessOptions::default()
    })
    .await;
    let response = h.client.get(format!("{}/mcp", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn query_params_are_promoted_to_headers() {
    let h = harness(StatelessOptions::default()).await;
    let response = h
        .client
        .post(format!("{}/mcp?gradio=none&bouquet=search", h.base))
        .json(&rpc("tools/list", json!({}), 1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let seen = h.factory.headers.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("x-mcp-bouquet").map(String::as_str), Some("search"));
    assert_eq!(seen[0].get("x-mcp-gradio").map(String::as_str), Some("none"));
}
