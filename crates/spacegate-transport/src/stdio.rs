//! Stdio transport: newline-delimited JSON-RPC on stdin/stdout.
//!
//! One implicit session for the process lifetime. Responses and
//! server-to-client notifications interleave on stdout, one JSON document
//! per line; logging goes to stderr so the protocol channel stays clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spacegate_server::{AuthState, McpRouter, RequestContext};

use crate::metrics::MetricsRegistry;
use crate::session::SessionMetadata;
use crate::{ConnectionCount, ServerTransport, TransportResult};

/// The stdio transport, bound to one pre-built scoped server.
pub struct StdioTransport {
    router: Arc<McpRouter>,
    auth: AuthState,
    token: Option<String>,
    metrics: Arc<MetricsRegistry>,
    draining: Arc<AtomicBool>,
    cancel: CancellationToken,
    configuration: Value,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Build the transport around an already-scoped server.
    pub fn new(
        router: Arc<McpRouter>,
        auth: AuthState,
        token: Option<String>,
        configuration: Value,
    ) -> Self {
        Self {
            router,
            auth,
            token,
            metrics: Arc::new(MetricsRegistry::new()),
            draining: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            configuration,
        }
    }

    /// Drive stdin/stdout until EOF or shutdown.
    pub async fn run(&self) -> TransportResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run_io(stdin, stdout).await
    }

    /// The loop itself, generic over the byte streams so tests can drive
    /// it with in-memory pipes.
    pub async fn run_io<R, W>(&self, reader: R, mut writer: W) -> TransportResult<()>
    where
        R: tokio::io::AsyncBufRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Value>();
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(notification) = notify_rx.recv() => {
                    write_line(&mut writer, &notification).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if self.draining.load(Ordering::Acquire) {
                        break;
                    }
                    if let Some(response) = self.handle_line(line, &notify_tx).await {
                        write_line(&mut writer, &response).await?;
                    }
                }
            }
        }

        // Flush anything the last handler queued before the loop ended.
        while let Ok(notification) = notify_rx.try_recv() {
            write_line(&mut writer, &notification).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn handle_line(
        &self,
        line: &str,
        notify_tx: &mpsc::UnboundedSender<Value>,
    ) -> Option<Value> {
        let started = std::time::Instant::now();
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(_) => {
                let error = spacegate_protocol::GatewayErrorCode::ParseError.to_error();
                let response = spacegate_protocol::jsonrpc::JsonRpcResponse::error_for(error, None);
                return serde_json::to_value(response).ok();
            }
        };
        let method = raw
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let ctx = RequestContext {
            headers: Arc::new(Default::default()),
            auth: self.auth.clone(),
            token: self.token.clone(),
            client_info: self.router.client_info(),
            session_id: None,
            progress_token: None,
            cancel: self.cancel.child_token(),
            notifier: Some(notify_tx.clone()),
        };

        let response = self.router.handle_value(raw, &ctx).await;
        let client = self.router.client_info().map(|c| c.name);
        crate::streamable::record_outcome(
            &self.metrics,
            &method,
            client.as_deref(),
            started,
            response.as_ref(),
        );
        response
    }
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    value: &Value,
) -> std::io::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[async_trait]
impl ServerTransport for StdioTransport {
    async fn initialize(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> TransportResult<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn shutdown(&self) {
        self.draining.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn active_connection_count(&self) -> ConnectionCount {
        ConnectionCount::Exact(1)
    }

    fn sessions(&self) -> Vec<SessionMetadata> {
        Vec::new()
    }

    fn metrics_snapshot(&self) -> Value {
        serde_json::to_value(self.metrics.snapshot()).unwrap_or(Value::Null)
    }

    fn configuration(&self) -> Value {
        self.configuration.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacegate_protocol::types::Implementation;
    use spacegate_server::{capabilities, ToolRegistry};

    fn transport() -> StdioTransport {
        let router = Arc::new(McpRouter::new(
            Implementation {
                name: "spacegate".to_string(),
                version: "0".to_string(),
                title: None,
            },
            None,
            capabilities::build(false, false),
            ToolRegistry::new(),
        ));
        StdioTransport::new(router, AuthState::Anonymous, None, Value::Null)
    }

    #[tokio::test]
    async fn serves_requests_line_by_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"cli","version":"1"}},"id":1}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"tools/list","id":2}"#,
            "\n",
        );
        let mut output = Vec::new();
        let t = transport();
        t.run_io(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["result"]["serverInfo"]["name"], "spacegate");
        assert_eq!(lines[1]["result"]["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn malformed_lines_get_parse_errors() {
        let input = "this is not json\n";
        let mut output = Vec::new();
        transport()
            .run_io(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        let response: Value =
            serde_json::from_str(String::from_utf8(output).unwrap().lines().next().unwrap())
                .unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let input = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string() + "\n";
        let mut output = Vec::new();
        transport()
            .run_io(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        assert!(output.is_empty());
    }
}
