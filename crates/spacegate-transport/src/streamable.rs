//! Stateful streaming HTTP transport.
//!
//! One axum router serving the MCP endpoint:
//!
//! - `POST` — initialize (creates a session; the only request allowed
//!   without a session id) and every subsequent call;
//! - `GET` — SSE stream attachment for server-to-client messages;
//! - `DELETE` — explicit session termination.
//!
//! Within a session, request handling is serialized by the underlying
//! response stream; across sessions everything is concurrent. Closing the
//! stream removes the session and cancels its in-flight upstream work.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use async_trait::async_trait;
use serde_json::{json, Value};

use spacegate_protocol::jsonrpc::{JsonRpcMessage, JsonRpcResponse};
use spacegate_protocol::types::RequestId;
use spacegate_protocol::GatewayErrorCode;
use spacegate_server::RequestContext;

use crate::auth::{AuthGate, GateResult, PROTECTED_RESOURCE_HEADER};
use crate::factory::{FactoryRequest, McpServerFactory, TransportKind};
use crate::manager::{RemovalReason, SessionEntry, SessionManager, SessionOptions};
use crate::metrics::MetricsRegistry;
use crate::session::SessionMetadata;
use crate::{
    promote_query_params, ConnectionCount, ServerTransport, TransportResult, SESSION_ID_HEADER,
};

/// Configuration for the streamable transport.
#[derive(Debug, Clone)]
pub struct StreamableHttpOptions {
    /// MCP endpoint path, e.g. `/mcp`.
    pub endpoint: String,
    /// Session table timings.
    pub session: SessionOptions,
    /// SSE comment keep-alive interval.
    pub sse_keep_alive: Duration,
}

impl Default for StreamableHttpOptions {
    fn default() -> Self {
        Self {
            endpoint: "/mcp".to_string(),
            session: SessionOptions::default(),
            sse_keep_alive: Duration::from_secs(15),
        }
    }
}

struct StreamableState {
    factory: Arc<dyn McpServerFactory>,
    gate: AuthGate,
    sessions: Arc<SessionManager>,
    metrics: Arc<MetricsRegistry>,
    options: StreamableHttpOptions,
    draining: AtomicBool,
    configuration: Value,
}

/// The stateful transport: session table, background loops, axum router.
#[derive(Clone)]
pub struct StreamableHttpTransport {
    state: Arc<StreamableState>,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("sessions", &self.state.sessions.len())
            .finish_non_exhaustive()
    }
}

impl StreamableHttpTransport {
    /// Build the transport. `configuration` is what the management surface
    /// reports (secrets already redacted by the caller).
    pub fn new(
        factory: Arc<dyn McpServerFactory>,
        gate: AuthGate,
        options: StreamableHttpOptions,
        configuration: Value,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            options.session.clone(),
            Arc::clone(&metrics),
        ));
        Self {
            state: Arc::new(StreamableState {
                factory,
                gate,
                sessions,
                metrics,
                options,
                draining: AtomicBool::new(false),
                configuration,
            }),
        }
    }

    /// The axum router: MCP endpoint plus the management surface.
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

    /// The session manager, exposed for tests.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.state.sessions
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.state.metrics
    }
}

#[async_trait]
impl ServerTransport for StreamableHttpTransport {
    async fn initialize(&self) -> TransportResult<()> {
        self.state.sessions.start();
        Ok(())
    }

    async fn cleanup(&self) -> TransportResult<()> {
        self.state.sessions.stop();
        Ok(())
    }

    fn shutdown(&self) {
        self.state.draining.store(true, Ordering::Release);
    }

    fn active_connection_count(&self) -> ConnectionCount {
        ConnectionCount::Exact(self.state.sessions.len())
    }

    fn sessions(&self) -> Vec<SessionMetadata> {
        self.state.sessions.snapshots()
    }

    fn metrics_snapshot(&self) -> Value {
        serde_json::to_value(self.state.metrics.snapshot()).unwrap_or(Value::Null)
    }

    fn configuration(&self) -> Value {
        self.state.configuration.clone()
    }
}

/// Normalize headers into a lowercase map and promote query params.
pub(crate) fn normalize_headers(headers: &HeaderMap, query: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }
    if let Some(query) = query {
        promote_query_params(&mut out, query);
    }
    out
}

/// The request id buried in a raw message, for error envelopes.
pub(crate) fn raw_request_id(raw: &Value) -> Option<RequestId> {
    raw.get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
}

/// A protocol-level error as an HTTP response.
pub(crate) fn protocol_error(
    status: StatusCode,
    code: GatewayErrorCode,
    id: Option<RequestId>,
) -> Response {
    let body = JsonRpcResponse::error_for(code.to_error(), id);
    (status, Json(serde_json::to_value(body).unwrap_or(Value::Null))).into_response()
}

fn is_server_error(code: i32) -> bool {
    code == GatewayErrorCode::InternalError.code()
        || code == GatewayErrorCode::ServerShuttingDown.code()
}

/// Record request metrics from a serialized response.
pub(crate) fn record_outcome(
    metrics: &MetricsRegistry,
    method: &str,
    client: Option<&str>,
    started: Instant,
    response: Option<&Value>,
) {
    let error_code = response
        .and_then(|r| r.get("error"))
        .and_then(|e| e.get("code"))
        .and_then(Value::as_i64);
    metrics.record_request(method, client, started.elapsed(), error_code.is_some());
    if let Some(code) = error_code {
        if is_server_error(code as i32) {
            metrics.record_server_error();
        } else {
            metrics.record_client_error();
        }
    }
    if method == "tools/call" {
        metrics.record_tool_call(client);
    }
}

async fn post_handler(
    State(state): State<Arc<StreamableState>>,
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

    let session_header = header_map.get(SESSION_ID_HEADER).cloned();

    // Ping replies come back as plain JSON-RPC responses on POST.
    if let Ok(JsonRpcMessage::Response(response)) =
        serde_json::from_value::<JsonRpcMessage>(raw.clone())
    {
        if let Some(id) = response.id.as_request_id() {
            state.sessions.complete_ping(&id.to_string());
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let method = raw
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if method == "initialize" {
        return initialize_session(&state, header_map, raw, addr.ip(), started).await;
    }

    // Everything else needs a session.
    let Some(session_id) = session_header else {
        return protocol_error(
            StatusCode::BAD_REQUEST,
            GatewayErrorCode::InvalidParams,
            request_id,
        );
    };
    let Some(entry) = state.sessions.get(&session_id) else {
        state.metrics.session_resume_failed();
        return protocol_error(
            StatusCode::NOT_FOUND,
            GatewayErrorCode::SessionNotFound,
            request_id,
        );
    };

    entry.meta.lock().touch();

    let ctx = session_context(&entry, header_map, Some(session_id));
    let response = entry.router.handle_value(raw, &ctx).await;
    let client = entry.router.client_info().map(|c| c.name);
    record_outcome(
        &state.metrics,
        &method,
        client.as_deref(),
        started,
        response.as_ref(),
    );

    match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn session_context(
    entry: &Arc<SessionEntry>,
    headers: HashMap<String, String>,
    session_id: Option<String>,
) -> RequestContext {
    RequestContext {
        headers: Arc::new(headers),
        auth: entry.auth.clone(),
        token: entry.token.clone(),
        client_info: entry.router.client_info(),
        session_id,
        progress_token: None,
        cancel: entry.cancel.child_token(),
        notifier: Some(entry.outbound.clone()),
    }
}

async fn initialize_session(
    state: &Arc<StreamableState>,
    header_map: HashMap<String, String>,
    raw: Value,
    ip: IpAddr,
    started: Instant,
) -> Response {
    let request_id = raw_request_id(&raw);

    let (auth, token) = match state.gate.check(&header_map).await {
        GateResult::Proceed { auth, token } => (auth, token),
        GateResult::Reject { oauth_hint } => return unauthorized(state, oauth_hint),
    };

    let session_cancel = tokio_util::sync::CancellationToken::new();
    let factory_request = FactoryRequest {
        headers: header_map.clone(),
        auth: auth.clone(),
        token: token.clone(),
        skip_gradio: false,
        transport: TransportKind::StreamableHttp,
        cancel: session_cancel.clone(),
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

    state.metrics.record_connection(auth.is_authenticated());
    let (session_id, entry) = state.sessions.create(
        Arc::clone(&scoped.router),
        auth,
        token,
        Some(ip),
        session_cancel,
    );

    let ctx = session_context(&entry, header_map, Some(session_id.clone()));
    let response = entry.router.handle_value(raw, &ctx).await;

    // Client identity is known only after the router parsed initialize.
    if let Some(client) = entry.router.client_info() {
        state.metrics.client_connected(&client.name);
        entry.meta.lock().client_info = Some(client.clone());
    }
    record_outcome(&state.metrics, "initialize", None, started, response.as_ref());

    let mut http_response =
        (StatusCode::OK, Json(response.unwrap_or(Value::Null))).into_response();
    if let Ok(value) = session_id.parse() {
        http_response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    http_response
}

fn unauthorized(state: &Arc<StreamableState>, oauth_hint: bool) -> Response {
    state.metrics.record_client_error();
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    if oauth_hint {
        if let Ok(value) = state.gate.resource_hint().parse() {
            response
                .headers_mut()
                .insert(PROTECTED_RESOURCE_HEADER, value);
        }
    }
    response
}

async fn get_handler(
    State(state): State<Arc<StreamableState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if state.draining.load(Ordering::Acquire) {
        return protocol_error(
            StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::ServerShuttingDown,
            None,
        );
    }

    let header_map = normalize_headers(&headers, query.as_deref());
    let Some(session_id) = header_map.get(SESSION_ID_HEADER).cloned() else {
        return protocol_error(StatusCode::BAD_REQUEST, GatewayErrorCode::InvalidParams, None);
    };
    let Some(entry) = state.sessions.get(&session_id) else {
        state.metrics.session_resume_failed();
        return protocol_error(StatusCode::NOT_FOUND, GatewayErrorCode::SessionNotFound, None);
    };

    // Observed for compatibility; the gateway does not replay events.
    if let Some(last_event_id) = header_map.get("last-event-id") {
        tracing::debug!(session = %session_id, %last_event_id, "reconnect with Last-Event-Id");
    }

    let Some(mut rx) = entry.take_stream() else {
        return protocol_error(StatusCode::CONFLICT, GatewayErrorCode::InvalidParams, None);
    };

    let stream = async_stream::stream! {
        while let Some(message) = rx.recv().await {
            yield Ok::<Event, std::convert::Infallible>(
                Event::default().event("message").data(message.to_string()),
            );
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.options.sse_keep_alive))
        .into_response();
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn delete_handler(
    State(state): State<Arc<StreamableState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let header_map = normalize_headers(&headers, query.as_deref());
    let Some(session_id) = header_map.get(SESSION_ID_HEADER) else {
        return protocol_error(StatusCode::BAD_REQUEST, GatewayErrorCode::InvalidParams, None);
    };
    if state.sessions.remove(session_id, RemovalReason::Deleted) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        protocol_error(StatusCode::NOT_FOUND, GatewayErrorCode::SessionNotFound, None)
    }
}

async fn metrics_handler(State(state): State<Arc<StreamableState>>) -> Json<Value> {
    Json(serde_json::to_value(state.metrics.snapshot()).unwrap_or(Value::Null))
}

async fn sessions_handler(State(state): State<Arc<StreamableState>>) -> Json<Value> {
    Json(serde_json::to_value(state.sessions.snapshots()).unwrap_or(Value::Null))
}

async fn config_handler(State(state): State<Arc<StreamableState>>) -> Json<Value> {
    Json(state.configuration.clone())
}

async fn health_handler(State(state): State<Arc<StreamableState>>) -> Json<Value> {
    Json(json!({
        "status": if state.draining.load(Ordering::Acquire) { "draining" } else { "ok" },
        "sessions": state.sessions.len(),
    }))
}
