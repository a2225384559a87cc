//! Per-call upstream MCP sessions.
//!
//! Tool invocation never reuses a pooled connection: every `tools/call`
//! opens a fresh streaming session against the Space's
//! `/gradio_api/mcp/sse` endpoint, performs the handshake, issues the call,
//! relays progress, and closes. The session's reader task is aborted on
//! every exit path, including cancellation, via `Drop`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use futures::StreamExt;

use spacegate_protocol::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use spacegate_protocol::types::{CallToolResult, ProgressParams, RequestId};
use spacegate_protocol::PROTOCOL_VERSION;

use crate::error::GradioError;
use crate::schema::SpaceHost;
use crate::space::SpaceId;
use crate::sse::{SseDecoder, SseEvent};
use crate::UPSTREAM_AUTH_HEADER;

/// How long the endpoint-discovery event may take after the stream opens.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards upstream progress notifications to the downstream caller.
///
/// The relay is keyed by the caller's own progress token: the upstream call
/// is issued with that token, so notifications pass through unchanged and
/// in upstream order.
#[derive(Debug, Clone)]
pub struct ProgressRelay {
    token: Value,
    sink: mpsc::UnboundedSender<Value>,
}

impl ProgressRelay {
    /// Create a relay for the caller's progress token.
    pub fn new(token: Value, sink: mpsc::UnboundedSender<Value>) -> Self {
        Self { token, sink }
    }

    /// The caller's progress token.
    pub fn token(&self) -> &Value {
        &self.token
    }

    fn forward(&self, notification: JsonRpcNotification) {
        // The receiver disappearing just means the caller is gone.
        let _ = self
            .sink
            .send(serde_json::to_value(notification).unwrap_or(Value::Null));
    }
}

/// An open streaming session to one Space.
#[derive(Debug)]
pub struct UpstreamSession {
    space: SpaceId,
    client: reqwest::Client,
    endpoint: Url,
    auth: HeaderMap,
    events: mpsc::UnboundedReceiver<SseEvent>,
    reader: tokio::task::JoinHandle<()>,
    next_id: i64,
}

impl UpstreamSession {
    /// Open the SSE stream and wait for the endpoint-discovery event.
    pub async fn connect(
        client: reqwest::Client,
        host: &SpaceHost,
        space: &SpaceId,
        subdomain: &str,
        private: bool,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Self, GradioError> {
        let sse_url = host.sse_url(subdomain)?;

        let mut auth = HeaderMap::new();
        if private {
            if let Some(token) = token {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                    auth.insert(UPSTREAM_AUTH_HEADER, value);
                }
            }
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GradioError::Cancelled),
            r = client
                .get(sse_url.clone())
                .headers(auth.clone())
                .header(ACCEPT, "text/event-stream")
                .send() => r.map_err(|e| GradioError::Http {
                    context: format!("sse stream for {space}"),
                    source: e,
                })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GradioError::Upstream {
                space: space.to_string(),
                detail: format!("sse endpoint returned {status}: {}", GradioError::clip_body(&body)),
            });
        }

        let (tx, mut events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                for event in decoder.feed(&chunk) {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        // First event must announce the message endpoint.
        let endpoint = tokio::select! {
            _ = cancel.cancelled() => {
                reader.abort();
                return Err(GradioError::Cancelled);
            }
            e = tokio::time::timeout(ENDPOINT_TIMEOUT, events.recv()) => match e {
                Ok(Some(event)) if event.event.as_deref() == Some("endpoint") => {
                    sse_url.join(event.data.trim()).map_err(|_| GradioError::Upstream {
                        space: space.to_string(),
                        detail: format!("unparseable endpoint event: {}", event.data),
                    })
                }
                Ok(Some(event)) => Err(GradioError::Upstream {
                    space: space.to_string(),
                    detail: format!(
                        "expected endpoint event, got {:?}",
                        event.event.as_deref().unwrap_or("message")
                    ),
                }),
                Ok(None) => Err(GradioError::Upstream {
                    space: space.to_string(),
                    detail: "stream closed before endpoint event".to_string(),
                }),
                Err(_) => Err(GradioError::Upstream {
                    space: space.to_string(),
                    detail: "timed out waiting for endpoint event".to_string(),
                }),
            },
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };

        Ok(Self {
            space: space.clone(),
            client,
            endpoint,
            auth,
            events,
            reader,
            next_id: 1,
        })
    }

    /// Invoke an upstream tool and await its final result.
    ///
    /// Progress notifications matching the relay's token are forwarded as
    /// they arrive, in upstream order. `deadline` of `None` waits
    /// indefinitely (the caller opted out of a timeout).
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Value,
        progress: Option<&ProgressRelay>,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, GradioError> {
        let init_id = self.send_request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "spacegate", "version": env!("CARGO_PKG_VERSION")},
            }),
            cancel,
        )
        .await?;
        self.await_response(init_id, None, Some(ENDPOINT_TIMEOUT), cancel)
            .await?;
        self.send_notification("notifications/initialized", None, cancel)
            .await?;

        let mut params = json!({"name": tool, "arguments": arguments});
        if let Some(relay) = progress {
            params["_meta"] = json!({"progressToken": relay.token()});
        }
        let call_id = self.send_request("tools/call", params, cancel).await?;

        let result = self
            .await_response(call_id, progress, deadline, cancel)
            .await?;
        serde_json::from_value(result).map_err(|e| GradioError::Upstream {
            space: self.space.to_string(),
            detail: format!("unparseable tool result: {e}"),
        })
    }

    /// Close the session. Also happens implicitly on drop.
    pub fn close(self) {
        // Drop does the work; this method exists so call sites read as the
        // acquire/release pair they are.
        drop(self);
    }

    async fn send_request(
        &mut self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<RequestId, GradioError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        let request = JsonRpcRequest::new(method, Some(params), id.clone());
        self.post(&serde_json::to_value(&request).unwrap_or_default(), cancel)
            .await?;
        Ok(id)
    }

    async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<(), GradioError> {
        let notification = JsonRpcNotification::new(method, params);
        self.post(
            &serde_json::to_value(&notification).unwrap_or_default(),
            cancel,
        )
        .await
    }

    async fn post(&self, body: &Value, cancel: &CancellationToken) -> Result<(), GradioError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GradioError::Cancelled),
            r = self
                .client
                .post(self.endpoint.clone())
                .headers(self.auth.clone())
                .header(CONTENT_TYPE, "application/json")
                .json(body)
                .send() => r.map_err(|e| GradioError::Http {
                    context: format!("message post for {}", self.space),
                    source: e,
                })?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GradioError::Upstream {
                space: self.space.to_string(),
                detail: format!("message post returned {status}: {}", GradioError::clip_body(&body)),
            });
        }
        Ok(())
    }

    /// Read stream events until the response for `id` arrives.
    async fn await_response(
        &mut self,
        id: RequestId,
        progress: Option<&ProgressRelay>,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Value, GradioError> {
        let timeout_context = format!("tool call on {}", self.space);
        let wait = async {
            loop {
                let Some(event) = self.events.recv().await else {
                    return Err(GradioError::Upstream {
                        space: self.space.to_string(),
                        detail: "stream closed before response".to_string(),
                    });
                };
                let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&event.data) else {
                    tracing::debug!(space = %self.space, "ignoring unparseable stream event");
                    continue;
                };
                match message {
                    JsonRpcMessage::Response(response) => {
                        if response.id.as_request_id() != Some(&id) {
                            continue;
                        }
                        if let Some(error) = response.error_obj() {
                            return Err(GradioError::UpstreamRpc {
                                code: error.code,
                                message: GradioError::clip_body(&error.message),
                            });
                        }
                        return Ok(response.result().cloned().unwrap_or(Value::Null));
                    }
                    JsonRpcMessage::Notification(notification)
                        if notification.method == "notifications/progress" =>
                    {
                        if let Some(relay) = progress {
                            let matches = serde_json::from_value::<ProgressParams>(
                                notification.params.clone().unwrap_or(Value::Null),
                            )
                            .map(|p| &p.progress_token == relay.token())
                            .unwrap_or(false);
                            if matches {
                                relay.forward(notification);
                            }
                        }
                    }
                    _ => {}
                }
            }
        };

        match deadline {
            Some(deadline) => tokio::select! {
                _ = cancel.cancelled() => Err(GradioError::Cancelled),
                r = tokio::time::timeout(deadline, wait) => match r {
                    Ok(result) => result,
                    Err(_) => Err(GradioError::Timeout {
                        context: timeout_context,
                        timeout_ms: deadline.as_millis() as u64,
                    }),
                },
            },
            None => tokio::select! {
                _ = cancel.cancelled() => Err(GradioError::Cancelled),
                r = wait => r,
            },
        }
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Open a session, invoke one tool, and close on every exit path.
#[allow(clippy::too_many_arguments)]
pub async fn call_space_tool(
    client: reqwest::Client,
    host: &SpaceHost,
    space: &SpaceId,
    subdomain: &str,
    private: bool,
    token: Option<&str>,
    tool: &str,
    arguments: Value,
    progress: Option<&ProgressRelay>,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CallToolResult, GradioError> {
    let mut session =
        UpstreamSession::connect(client, host, space, subdomain, private, token, cancel).await?;
    let result = session
        .call_tool(tool, arguments, progress, deadline, cancel)
        .await;
    session.close();
    result
}
