//! Stateless JSON transport.
//!
//! Every `POST` builds a fresh scoped server, processes one request, and
//! tears it down. Two optimisations keep the hot path cheap without
//! breaking statelessness:
//!
//! - **stub responder**: methods outside the full set (`initialize`,
//!   `tools/list`, `tools/call`, `prompts/list`, `prompts/get`) are
//!   answered by a prebuilt stub server that serves only protocol
//!   bookkeeping — no tool registration at all;
//! - **skip-gradio**: initialize, and `tools/call` whose target does not
//!   have the outward Gradio name shape, invoke the factory with
//!   `skip_gradio`, bypassing all remote discovery.
//!
//! One exception to the stub fast path: `resources/*` methods from
//! resource-capable clients (recognized by User-Agent) get a full scoped
//! server, so those clients see the same resource surface on every
//! transport.
//!
//! Optional analytics mode tracks sessions in memory purely for
//! observability; routing never depends on it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use spacegate_gradio::is_outward_gradio_name;
use spacegate_protocol::types::Implementation;
use spacegate_protocol::GatewayErrorCode;
use spacegate_server::{capabilities, McpRouter, RequestContext, ToolRegistry};

use crate::auth::{AuthGate, GateResult, PROTECTED_RESOURCE_HEADER};
use crate::factory::{FactoryRequest, McpServerFactory, TransportKind};
use crate::metrics::MetricsRegistry;
use crate::session::SessionMetadata;
use crate::streamable::{normalize_headers, protocol_error, raw_request_id, record_outcome};
use crate::{ConnectionCount, ServerTransport, TransportResult, SESSION_ID_HEADER};

/// Methods that get a full scoped server; everything else goes to the stub.
const FULL_SERVER_METHODS: &[&str] = &[
    "initialize",
    "tools/list",
    "tools/call",
    "prompts/list",
    "prompts/get",
];

/// Clients whose `resources/*` requests also get a full scoped server.
///
/// The stateless transport has no session to remember initialize's
/// `clientInfo`, so recognition goes by User-Agent substring. The Claude
/// family is currently the only client that consumes MCP resources.
const RESOURCE_CAPABLE_CLIENTS: &[&str] = &["claude"];

/// Configuration for the stateless transport.
#[derive(Debug, Clone)]
pub struct StatelessOptions {
    /// MCP endpoint path.
    pub endpoint: String,
    /// Serve a welcome page on GET (`false` rejects with 405).
    pub welcome_page: bool,
    /// Track analytics-only sessions.
    pub analytics_sessions: bool,
    /// Bounded count of diagnostic log entries emitted on session-resume
    /// failure. Zero disables the temporary logging entirely.
    pub temp_log_budget: u32,
}

impl Default for StatelessOptions {
    fn default() -> Self {
        Self {
            endpoint: "/mcp".to_string(),
            welcome_page: true,
            analytics_sessions: false,
            temp_log_budget: 0,
        }
    }
}

struct StatelessState {
    factory: Arc<dyn McpServerFactory>,
    gate: AuthGate,
    metrics: Arc<MetricsRegistry>,
    options: StatelessOptions,
    draining: AtomicBool,
    analytics: DashMap<String, SessionMetadata>,
    temp_log_budget: AtomicI64,
    stub: Arc<McpRouter>,
    configuration: Value,
}

/// The stateless transport.
#[derive(Clone)]
pub struct StatelessHttpTransport {
    state: Arc<StatelessState>,
}

impl std::fmt::Debug for StatelessHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessHttpTransport").finish_non_exhaustive()
    }
}

/// The stub responder: a server with no tools that still answers protocol
/// bookkeeping correctly.
fn build_stub() -> Arc<McpRouter> {
    Arc::new(McpRouter::new(
        Implementation {
            name: "spacegate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
        },
        None,
        capabilities::build(false, false),
        ToolRegistry::new(),
    ))
}

impl StatelessHttpTransport {
    /// Build the transport.
    pub fn new(
        factory: Arc<dyn McpServerFactory>,
        gate: AuthGate,
        options: StatelessOptions,
        configuration: Value,
    ) -> Self {
        let temp_log_budget = AtomicI64::new(i64::from(options.temp_log_budget));
        Self {
            state: Arc::new(StatelessState {
                factory,
                gate,
                metrics: Arc::new(MetricsRegistry::new()),
                options,
                draining: AtomicBool::new(false),
                analytics: DashMap::new(),
                temp_log_budget,
                stub: build_stub(),
                configuration,
            }),
        }
    }

    /// The axum router.
    pub fn router(&self) -> Router {
        let endpoint = self.state.options.endpoint.clone();
        Router::new()
            .route(
                &endpoint,
                post(post_handler).get(get_handler).delete(delete_handler),
            )
            .route("/api/metrics", get(metrics_handler))
            .route("/api/sessions", get(sessions_handler))
            .route("/api/config", get(config_handler))
            .route("/health", get(health_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.state.metrics
    }
}

#[async_trait]
impl ServerTransport for StatelessHttpTransport {
    async fn initialize(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> TransportResult<()> {
        self.state.analytics.clear();
        Ok(())
    }

    fn shutdown(&self) {
        self.state.draining.store(true, Ordering::Release);
    }

    fn active_connection_count(&self) -> ConnectionCount {
        ConnectionCount::Stateless
    }

    fn sessions(&self) -> Vec<SessionMetadata> {
        self.state
            .analytics
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    fn metrics_snapshot(&self) -> Value {
        serde_json::to_value(self.state.metrics.snapshot()).unwrap_or(Value::Null)
    }

    fn configuration(&self) -> Value {
        self.state.configuration.clone()
    }
}

fn needs_full_server(method: &str, headers: &HashMap<String, String>) -> bool {
    if FULL_SERVER_METHODS.contains(&method) {
        return true;
    }
    method.starts_with("resources/") && is_resource_capable_client(headers)
}

fn is_resource_capable_client(headers: &HashMap<String, String>) -> bool {
    headers.get("user-agent").is_some_and(|agent| {
        let agent = agent.to_ascii_lowercase();
        RESOURCE_CAPABLE_CLIENTS
            .iter()
            .any(|client| agent.contains(client))
    })
}

/// Skip remote discovery for initialize and for calls that cannot possibly
/// target a Gradio tool.
fn skip_gradio_for(method: &str, raw: &Value) -> bool {
    match method {
        "initialize" => true,
        "tools/call" => raw
            .pointer("/params/name")
            .and_then(Value::as_str)
            .is_some_and(|name| !is_outward_gradio_name(name)),
        _ => false,
    }
}

async fn post_handler(
    State(state): State<Arc<StatelessState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> Response {
    let started = Instant::now();
    let header_map = normalize_headers(&headers, query.as_deref());
    state.metrics.record_ip(addr.ip());

    let raw: Value = match serde_json::from_str(&body) {
        Ok(raw) => raw,
        Err(_) => return protocol_error(StatusCode::BAD_REQUEST, GatewayErrorCode::ParseError, None),
    };
    let request_id = raw_request_id(&raw);

    if state.draining.load(Ordering::Acquire) {
        return protocol_error(
            StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::ServerShuttingDown,
            request_id,
        );
    }

    let method = raw
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Stub fast path: protocol bookkeeping without any tool registration.
    if !needs_full_server(&method, &header_map) {
        let ctx = RequestContext::with_headers(header_map);
        let response = state.stub.handle_value(raw, &ctx).await;
        record_outcome(&state.metrics, &method, None, started, response.as_ref());
        return match response {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
    }

    let (auth, token) = match state.gate.check(&header_map).await {
        GateResult::Proceed { auth, token } => (auth, token),
        GateResult::Reject { oauth_hint } => {
            state.metrics.record_client_error();
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            if oauth_hint {
                if let Ok(value) = state.gate.resource_hint().parse() {
                    response
                        .headers_mut()
                        .insert(PROTECTED_RESOURCE_HEADER, value);
                }
            }
            return response;
        }
    };

    // Analytics-only session tracking. Never affects routing.
    let mut issued_session: Option<String> = None;
    if state.options.analytics_sessions {
        if method == "initialize" {
            let id = format!("mcp-{}", Uuid::new_v4().simple());
            state.analytics.insert(
                id.clone(),
                SessionMetadata::new(id.clone(), auth.is_authenticated(), Some(addr.ip())),
            );
            state.metrics.session_created();
            issued_session = Some(id);
        } else if let Some(session_id) = header_map.get(SESSION_ID_HEADER) {
            match state.analytics.get_mut(session_id) {
                Some(mut entry) => entry.touch(),
                None => {
                    state.metrics.session_resume_failed();
                    temp_log_resume_failure(&state, session_id);
                }
            }
        }
    }

    let request_cancel = tokio_util::sync::CancellationToken::new();
    let factory_request = FactoryRequest {
        headers: header_map.clone(),
        auth: auth.clone(),
        token: token.clone(),
        skip_gradio: skip_gradio_for(&method, &raw),
        transport: TransportKind::StatelessJson,
        cancel: request_cancel.clone(),
    };
    let scoped = match state.factory.create(factory_request).await {
        Ok(scoped) => scoped,
        Err(e) => {
            tracing::error!(error = %e, "server factory failed");
            state.metrics.record_server_error();
            return protocol_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                GatewayErrorCode::InternalError,
                request_id,
            );
        }
    };

    if method == "initialize" {
        state.metrics.record_connection(auth.is_authenticated());
    }

    let ctx = RequestContext {
        headers: Arc::new(header_map),
        auth,
        token,
        client_info: None,
        session_id: issued_session.clone(),
        progress_token: None,
        cancel: request_cancel,
        notifier: None,
    };

    let response = scoped.router.handle_value(raw, &ctx).await;

    let client = scoped.router.client_info().map(|c| c.name);
    if let (Some(id), Some(client_info)) = (&issued_session, scoped.router.client_info()) {
        if let Some(mut entry) = state.analytics.get_mut(id) {
            entry.client_info = Some(client_info);
        }
    }
    record_outcome(
        &state.metrics,
        &method,
        client.as_deref(),
        started,
        response.as_ref(),
    );

    let mut http_response = match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(id) = issued_session {
        if let Ok(value) = id.parse() {
            http_response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
    http_response
}

/// Bounded diagnostic logging for session-resume failures. Decrements with
/// each use; exhausted budgets stay at zero.
fn temp_log_resume_failure(state: &Arc<StatelessState>, session_id: &str) {
    let granted = state
        .temp_log_budget
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |budget| {
            (budget > 0).then(|| budget - 1)
        })
        .is_ok();
    if granted {
        tracing::warn!(
            session = session_id,
            remaining = state.temp_log_budget.load(Ordering::Acquire),
            "analytics session resume failed"
        );
    }
}

async fn get_handler(State(state): State<Arc<StatelessState>>) -> Response {
    if state.options.welcome_page {
        Html(WELCOME_PAGE).into_response()
    } else {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST, DELETE")],
        )
            .into_response()
    }
}

async fn delete_handler(
    State(state): State<Arc<StatelessState>>,
    headers: HeaderMap,
) -> Response {
    if !state.options.analytics_sessions {
        return protocol_error(
            StatusCode::METHOD_NOT_ALLOWED,
            GatewayErrorCode::MethodNotAllowed,
            None,
        );
    }
    let header_map = normalize_headers(&headers, None);
    let Some(session_id) = header_map.get(SESSION_ID_HEADER) else {
        return protocol_error(StatusCode::BAD_REQUEST, GatewayErrorCode::InvalidParams, None);
    };
    if state.analytics.remove(session_id).is_some() {
        state.metrics.session_deleted();
        StatusCode::NO_CONTENT.into_response()
    } else {
        protocol_error(StatusCode::NOT_FOUND, GatewayErrorCode::SessionNotFound, None)
    }
}

async fn metrics_handler(State(state): State<Arc<StatelessState>>) -> Json<Value> {
    Json(serde_json::to_value(state.metrics.snapshot()).unwrap_or(Value::Null))
}

async fn sessions_handler(State(state): State<Arc<StatelessState>>) -> Json<Value> {
    let sessions: Vec<SessionMetadata> = state
        .analytics
        .iter()
        .map(|e| e.value().clone())
        .collect();
    Json(serde_json::to_value(sessions).unwrap_or(Value::Null))
}

async fn config_handler(State(state): State<Arc<StatelessState>>) -> Json<Value> {
    Json(state.configuration.clone())
}

async fn health_handler(State(state): State<Arc<StatelessState>>) -> Json<Value> {
    Json(json!({
        "status": if state.draining.load(Ordering::Acquire) { "draining" } else { "ok" },
    }))
}

const WELCOME_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>spacegate</title></head>
<body>
<h1>spacegate</h1>
<p>This is an MCP endpoint. Point your MCP client at <code>POST /mcp</code>.</p>
</body>
</html>
"#;
